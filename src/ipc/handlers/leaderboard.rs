use crate::db;
use crate::grading::{compute_aggregates, rank_by, rank_subject, GradingConfig, RankKey};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_required_str, parse_class, parse_limit, require_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_metric(params: &serde_json::Value) -> Result<RankKey, HandlerErr> {
    match params.get("metric") {
        None => Ok(RankKey::Metric),
        Some(v) if v.is_null() => Ok(RankKey::Metric),
        Some(v) => v
            .as_str()
            .and_then(RankKey::parse)
            .ok_or_else(|| HandlerErr::new("bad_params", "metric must be 'grade' or 'attendance'")),
    }
}

/// Overall leaderboard: aggregate the filtered cohort, rank it whole, then
/// cut to the limit. Ranks always reflect the full filtered population.
fn handle_overall(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class = parse_class(&req.params)?;
    let metric = parse_metric(&req.params)?;
    let limit = parse_limit(&req.params)?;

    let class_filter = class.as_deref();
    let students = db::fetch_students(conn, class_filter).map_err(db_err)?;
    let marks = db::fetch_mark_rows(conn, class_filter, None).map_err(db_err)?;
    let attendance = db::fetch_attendance_rows(conn, class_filter).map_err(db_err)?;

    let aggregates = compute_aggregates(&students, &marks, &attendance, &GradingConfig::default());
    let mut ranked = rank_by(aggregates, metric);
    let cohort_size = ranked.len();
    if let Some(limit) = limit {
        ranked.truncate(limit);
    }

    Ok(ok(
        &req.id,
        json!({
            "class": class.unwrap_or_else(|| "all".to_string()),
            "metric": match metric {
                RankKey::Metric => "grade",
                RankKey::Attendance => "attendance",
            },
            "cohortSize": cohort_size,
            "entries": ranked,
        }),
    ))
}

/// Subject leaderboard: cohort is the subject's enrollees and the ranking key
/// is the subject total, not the cross-subject average.
fn handle_subject(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_code = get_required_str(&req.params, "subjectCode")?;
    let class = parse_class(&req.params)?;
    let limit = parse_limit(&req.params)?;

    let class_filter = class.as_deref();
    let students = db::fetch_students(conn, class_filter).map_err(db_err)?;
    let marks = db::fetch_mark_rows(conn, class_filter, Some(&subject_code)).map_err(db_err)?;

    let mut standings = rank_subject(&students, &marks, &subject_code, &GradingConfig::default());
    let cohort_size = standings.len();
    if let Some(limit) = limit {
        standings.truncate(limit);
    }

    Ok(ok(
        &req.id,
        json!({
            "subjectCode": subject_code,
            "class": class.unwrap_or_else(|| "all".to_string()),
            "cohortSize": cohort_size,
            "entries": standings,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "leaderboard.overall" => {
            Some(handle_overall(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        "leaderboard.subject" => {
            Some(handle_subject(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        _ => None,
    }
}
