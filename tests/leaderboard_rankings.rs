use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_ranklistd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn ranklistd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn seed_conn(workspace: &Path) -> Connection {
    ranklistd::db::open_db(workspace).expect("open workspace db")
}

fn insert_student(conn: &Connection, id: &str, roll: i64, class: &str) {
    conn.execute(
        "INSERT INTO students(id, roll_number, enrollment_no, name, birth_date, class_name)
         VALUES (?, ?, ?, ?, NULL, ?)",
        (id, roll, format!("EN{roll}"), format!("Student {roll}"), class),
    )
    .expect("insert student");
}

fn insert_mark(conn: &Connection, student_id: &str, subject: &str, end_sem: f64) {
    conn.execute(
        "INSERT INTO subject_marks(id, student_id, subject_code, end_sem)
         VALUES (?, ?, ?, ?)",
        (
            format!("m-{student_id}-{subject}"),
            student_id,
            subject,
            end_sem,
        ),
    )
    .expect("insert mark");
}

fn insert_attendance(conn: &Connection, student_id: &str, subject: &str, percentage: f64) {
    conn.execute(
        "INSERT INTO attendance(student_id, subject_code, percentage) VALUES (?, ?, ?)",
        (student_id, subject, percentage),
    )
    .expect("insert attendance");
}

#[test]
fn truncation_happens_after_ranking() {
    let workspace = temp_dir("ranklist-leaderboard-limit");
    {
        let conn = seed_conn(&workspace);
        for i in 0..15_i64 {
            let id = format!("s{i}");
            insert_student(&conn, &id, 1001 + i, "CSE-A");
            insert_mark(&conn, &id, "MA101", 150.0 - 5.0 * i as f64);
        }
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "leaderboard.overall",
        json!({ "class": "CSE-A", "metric": "grade", "limit": 10 }),
    );

    assert_eq!(result["cohortSize"], json!(15));
    let entries = result["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 10);
    for (i, entry) in entries.iter().enumerate() {
        // Ranks reflect the full cohort, 1..10 with no restart.
        assert_eq!(entry["rank"], json!(i as i64 + 1));
        assert_eq!(entry["rollNumber"], json!(1001 + i as i64));
    }
    assert_eq!(entries[0]["sgpa"], json!(10.0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn ties_break_by_lower_roll_number() {
    let workspace = temp_dir("ranklist-leaderboard-ties");
    {
        let conn = seed_conn(&workspace);
        // Inserted high roll first; ordering must not depend on insert order.
        insert_student(&conn, "b1", 1020, "CSE-B");
        insert_student(&conn, "b2", 1005, "CSE-B");
        for id in ["b1", "b2"] {
            // Grade points 8 and 7 -> weighted metric 7.50 for both.
            insert_mark(&conn, id, "MA101", 105.0);
            insert_mark(&conn, id, "PH102", 90.0);
        }
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "leaderboard.overall",
        json!({ "class": "CSE-B" }),
    );

    let entries = result["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["sgpa"], json!(7.5));
    assert_eq!(entries[1]["sgpa"], json!(7.5));
    assert_eq!(entries[0]["rollNumber"], json!(1005));
    assert_eq!(entries[0]["rank"], json!(1));
    assert_eq!(entries[1]["rollNumber"], json!(1020));
    assert_eq!(entries[1]["rank"], json!(2));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn attendance_metric_reorders_the_board() {
    let workspace = temp_dir("ranklist-leaderboard-attendance");
    {
        let conn = seed_conn(&workspace);
        for i in 0..4_i64 {
            let id = format!("s{i}");
            insert_student(&conn, &id, 1001 + i, "CSE-A");
            // Marks favour low rolls, attendance favours high rolls.
            insert_mark(&conn, &id, "MA101", 150.0 - 10.0 * i as f64);
            insert_attendance(&conn, &id, "MA101", 60.0 + 10.0 * i as f64);
        }
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "leaderboard.overall",
        json!({ "class": "CSE-A", "metric": "attendance" }),
    );

    let entries = result["entries"].as_array().expect("entries array");
    assert_eq!(entries[0]["rollNumber"], json!(1004));
    assert_eq!(entries[0]["attendance"], json!(90.0));
    assert_eq!(entries[3]["rollNumber"], json!(1001));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unknown_class_yields_empty_board() {
    let workspace = temp_dir("ranklist-leaderboard-unknown-class");
    {
        let conn = seed_conn(&workspace);
        insert_student(&conn, "s0", 1001, "CSE-A");
        insert_mark(&conn, "s0", "MA101", 120.0);
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "leaderboard.overall",
        json!({ "class": "NO-SUCH-CLASS" }),
    );
    assert_eq!(result["cohortSize"], json!(0));
    assert_eq!(result["entries"], json!([]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn bad_metric_and_bad_limit_are_rejected() {
    let workspace = temp_dir("ranklist-leaderboard-bad-params");
    {
        let _ = seed_conn(&workspace);
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resp = request_raw(
        &mut stdin,
        &mut reader,
        "r2",
        "leaderboard.overall",
        json!({ "metric": "vibes" }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));

    let resp = request_raw(
        &mut stdin,
        &mut reader,
        "r3",
        "leaderboard.overall",
        json!({ "limit": 0 }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn queries_before_workspace_select_fail_cleanly() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request_raw(
        &mut stdin,
        &mut reader,
        "r1",
        "leaderboard.overall",
        json!({}),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("no_workspace"));

    drop(stdin);
    let _ = child.wait();
}
