use crate::db::{self, RosterFilters, RosterRow};
use crate::ingest;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// The `week` filter arrives as a number or any week spelling the header
/// normalizer accepts; both canonicalize to the stored label.
fn parse_week_param(req: &Request) -> Result<Option<String>, serde_json::Value> {
    let value = match req.params.get("week") {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let raw = if let Some(n) = value.as_u64() {
        n.to_string()
    } else if let Some(s) = value.as_str() {
        s.to_string()
    } else {
        return Err(err(
            &req.id,
            "bad_params",
            "week must be a number or a string",
            None,
        ));
    };
    match ingest::canonical_week_label(&raw) {
        Some(label) => Ok(Some(label)),
        None => Err(err(
            &req.id,
            "bad_params",
            format!("week '{}' is not recognized", raw),
            None,
        )),
    }
}

fn roster_entry(row: &RosterRow, score: Option<f64>) -> serde_json::Value {
    json!({
        "rollNumber": row.roll_number,
        "name": row.name,
        "email": row.email,
        "branch": row.branch,
        "year": row.year,
        "score": score.unwrap_or(0.0),
    })
}

fn week_number(label: &str) -> u32 {
    label
        .split_whitespace()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn handle_reports_submissions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    let week_label = match parse_week_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let year = optional_str(req, "year");
    let branch = optional_str(req, "branch");
    let faculty_name = optional_str(req, "facultyName");

    let roster = match db::find_students_by_course(
        conn,
        &course_id,
        RosterFilters {
            year: year.as_deref(),
            branch: branch.as_deref(),
            faculty_name: faculty_name.as_deref(),
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Score per canonical week, per student. A duplicate label keeps the
    // later entry, matching how merges resolve duplicate columns.
    let mut scores: Vec<HashMap<String, f64>> = Vec::with_capacity(roster.len());
    for row in &roster {
        let results = match db::week_results_for_enrollment(conn, &row.enrollment_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        scores.push(results.into_iter().collect());
    }

    match week_label {
        Some(label) => {
            let mut submitted: Vec<serde_json::Value> = Vec::new();
            let mut not_submitted: Vec<serde_json::Value> = Vec::new();
            for (row, week_scores) in roster.iter().zip(&scores) {
                let score = week_scores.get(&label).copied();
                if score.unwrap_or(0.0) > 0.0 {
                    submitted.push(roster_entry(row, score));
                } else {
                    not_submitted.push(roster_entry(row, score));
                }
            }
            ok(
                &req.id,
                json!({
                    "courseId": course_id,
                    "week": label,
                    "total": roster.len(),
                    "submitted": submitted,
                    "notSubmitted": not_submitted,
                }),
            )
        }
        None => {
            let mut submitted_by_week: HashMap<String, usize> = HashMap::new();
            for week_scores in &scores {
                for (label, score) in week_scores {
                    let entry = submitted_by_week.entry(label.clone()).or_insert(0);
                    if *score > 0.0 {
                        *entry += 1;
                    }
                }
            }
            let mut weeks: Vec<(String, usize)> = submitted_by_week.into_iter().collect();
            weeks.sort_by_key(|(label, _)| week_number(label));
            let weeks: Vec<serde_json::Value> = weeks
                .into_iter()
                .map(|(label, submitted)| {
                    json!({
                        "week": label,
                        "submitted": submitted,
                        "notSubmitted": roster.len() - submitted,
                    })
                })
                .collect();
            ok(
                &req.id,
                json!({
                    "courseId": course_id,
                    "total": roster.len(),
                    "weeks": weeks,
                }),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.submissions" => Some(handle_reports_submissions(state, req)),
        _ => None,
    }
}
