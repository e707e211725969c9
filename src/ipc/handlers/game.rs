use crate::db;
use crate::grading::{compute_aggregates, rank_by, random_pair, GradingConfig, RankKey};
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_err, parse_class, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use serde_json::json;

fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Students whose stored date of birth matches the reference day and month,
/// run through the usual grading pipeline. The date defaults to today; an
/// explicit `date` param pins the cohort down.
fn handle_birthdays(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let reference = match req.params.get("date") {
        None => chrono::Local::now().date_naive(),
        Some(v) if v.is_null() => chrono::Local::now().date_naive(),
        Some(v) => v
            .as_str()
            .and_then(parse_birth_date)
            .ok_or_else(|| HandlerErr::new("bad_params", "date must be YYYY-MM-DD"))?,
    };

    let students = db::fetch_students(conn, None).map_err(db_err)?;
    let celebrants: Vec<_> = students
        .into_iter()
        .filter(|s| {
            s.birth_date
                .as_deref()
                .and_then(parse_birth_date)
                .map(|d| d.day() == reference.day() && d.month() == reference.month())
                .unwrap_or(false)
        })
        .collect();

    let marks = db::fetch_mark_rows(conn, None, None).map_err(db_err)?;
    let attendance = db::fetch_attendance_rows(conn, None).map_err(db_err)?;
    let aggregates =
        compute_aggregates(&celebrants, &marks, &attendance, &GradingConfig::default());
    let ranked = rank_by(aggregates, RankKey::Metric);

    Ok(ok(
        &req.id,
        json!({
            "date": reference.format("%Y-%m-%d").to_string(),
            "entries": ranked,
        }),
    ))
}

/// Two distinct students chosen uniformly for the guessing game. No ranking.
fn handle_random_pair(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class = parse_class(&req.params)?;

    let class_filter = class.as_deref();
    let students = db::fetch_students(conn, class_filter).map_err(db_err)?;
    let marks = db::fetch_mark_rows(conn, class_filter, None).map_err(db_err)?;
    let attendance = db::fetch_attendance_rows(conn, class_filter).map_err(db_err)?;
    let aggregates = compute_aggregates(&students, &marks, &attendance, &GradingConfig::default());

    let mut rng = rand::rng();
    let Some((a, b)) = random_pair(&aggregates, &mut rng) else {
        return Err(HandlerErr::new(
            "not_found",
            "cohort has fewer than two students",
        ));
    };

    Ok(ok(&req.id, json!({ "pair": [a, b] })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "game.birthdays" => {
            Some(handle_birthdays(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        "game.randomPair" => {
            Some(handle_random_pair(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        _ => None,
    }
}
