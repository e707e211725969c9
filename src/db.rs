use crate::grading::{AttendanceRow, MarkRow, StudentRow};
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "ranklist.sqlite3";

/// Opens the workspace dataset, creating the schema idempotently. The engine
/// only ever reads these tables; they are populated out of band.
pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            roll_number INTEGER NOT NULL UNIQUE,
            enrollment_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            birth_date TEXT,
            class_name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            ct1 REAL,
            ct2 REAL,
            ct3 REAL,
            assignment REAL,
            mid_sem REAL,
            end_sem REAL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, subject_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_marks_student ON subject_marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_marks_subject ON subject_marks(subject_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            student_id TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            percentage REAL NOT NULL,
            PRIMARY KEY(student_id, subject_code),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    Ok(conn)
}

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        roll_number: r.get(1)?,
        enrollment_no: r.get(2)?,
        name: r.get(3)?,
        birth_date: r.get(4)?,
        class_name: r.get(5)?,
    })
}

/// Identity rows for a cohort, ordered by roll number. `class` of None means
/// the whole cohort; an unknown label simply matches nothing.
pub fn fetch_students(conn: &Connection, class: Option<&str>) -> anyhow::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, roll_number, enrollment_no, name, birth_date, class_name
         FROM students
         WHERE (?1 IS NULL OR class_name = ?1)
         ORDER BY roll_number",
    )?;
    let rows = stmt
        .query_map([class], |r| student_from_row(r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_student_by_roll(
    conn: &Connection,
    roll_number: i64,
) -> anyhow::Result<Option<StudentRow>> {
    use rusqlite::OptionalExtension;
    let row = conn
        .query_row(
            "SELECT id, roll_number, enrollment_no, name, birth_date, class_name
             FROM students
             WHERE roll_number = ?",
            [roll_number],
            |r| student_from_row(r),
        )
        .optional()?;
    Ok(row)
}

/// Flat mark rows joined against identity for the cohort filters. One wide
/// fetch per request; all grouping happens in memory afterwards.
pub fn fetch_mark_rows(
    conn: &Connection,
    class: Option<&str>,
    subject_code: Option<&str>,
) -> anyhow::Result<Vec<MarkRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.student_id, m.subject_code,
                m.ct1, m.ct2, m.ct3, m.assignment, m.mid_sem, m.end_sem
         FROM subject_marks m
         JOIN students s ON s.id = m.student_id
         WHERE (?1 IS NULL OR s.class_name = ?1)
           AND (?2 IS NULL OR m.subject_code = ?2)",
    )?;
    let rows = stmt
        .query_map([class, subject_code], |r| {
            Ok(MarkRow {
                student_id: r.get(0)?,
                subject_code: r.get(1)?,
                ct1: r.get(2)?,
                ct2: r.get(3)?,
                ct3: r.get(4)?,
                assignment: r.get(5)?,
                mid_sem: r.get(6)?,
                end_sem: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_attendance_rows(
    conn: &Connection,
    class: Option<&str>,
) -> anyhow::Result<Vec<AttendanceRow>> {
    let mut stmt = conn.prepare(
        "SELECT a.student_id, a.subject_code, a.percentage
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE (?1 IS NULL OR s.class_name = ?1)",
    )?;
    let rows = stmt
        .query_map([class], |r| {
            Ok(AttendanceRow {
                student_id: r.get(0)?,
                subject_code: r.get(1)?,
                percentage: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
