use crate::db;
use crate::grading::{
    compute_aggregates, rank_by, subject_results_for, GradingConfig, RankKey,
    RankedStudentAggregate,
};
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_err, parse_class, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class = parse_class(&req.params)?;
    let students = db::fetch_students(conn, class.as_deref()).map_err(db_err)?;
    Ok(ok(
        &req.id,
        json!({
            "class": class.unwrap_or_else(|| "all".to_string()),
            "students": students,
        }),
    ))
}

/// Profile card payload: the student's aggregate, their rank within the full
/// cohort, and the per-subject breakdown behind the numbers.
fn profile_payload(conn: &Connection, roll_number: i64) -> Result<serde_json::Value, HandlerErr> {
    let Some(student) = db::fetch_student_by_roll(conn, roll_number).map_err(db_err)? else {
        return Err(HandlerErr::new(
            "not_found",
            format!("no student with roll number {}", roll_number),
        ));
    };

    let students = db::fetch_students(conn, None).map_err(db_err)?;
    let marks = db::fetch_mark_rows(conn, None, None).map_err(db_err)?;
    let attendance = db::fetch_attendance_rows(conn, None).map_err(db_err)?;

    let config = GradingConfig::default();
    let aggregates = compute_aggregates(&students, &marks, &attendance, &config);
    let ranked = rank_by(aggregates, RankKey::Metric);
    let cohort_size = ranked.len();
    let entry: &RankedStudentAggregate = ranked
        .iter()
        .find(|r| r.aggregate.student_id == student.id)
        .ok_or_else(|| HandlerErr::new("not_found", "student missing from cohort"))?;

    let subjects = subject_results_for(&student.id, &marks, &attendance, &config);

    Ok(json!({
        "student": student,
        "sgpa": entry.aggregate.sgpa,
        "attendance": entry.aggregate.attendance,
        "rank": entry.rank,
        "cohortSize": cohort_size,
        "subjects": subjects,
    }))
}

fn handle_profile(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let roll_number = req
        .params
        .get("rollNumber")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing rollNumber"))?;
    let payload = profile_payload(conn, roll_number)?;
    Ok(ok(&req.id, payload))
}

/// Side-by-side comparison of exactly two students, in requested order.
fn handle_compare(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let rolls: Vec<i64> = req
        .params
        .get("rollNumbers")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default();
    if rolls.len() != 2 {
        return Err(HandlerErr::new(
            "bad_params",
            "rollNumbers must be an array of exactly 2 roll numbers",
        ));
    }

    let left = profile_payload(conn, rolls[0])?;
    let right = profile_payload(conn, rolls[1])?;
    Ok(ok(&req.id, json!({ "students": [left, right] })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req).unwrap_or_else(|e| e.response(&req.id))),
        "students.profile" => {
            Some(handle_profile(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        "students.compare" => {
            Some(handle_compare(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        _ => None,
    }
}
