use crate::db;
use crate::ingest::{self, CourseRef, HeaderMap, ImportError, RowIdentity};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;
use tracing::{debug, info, warn};

/// Bulk score ingestion: resolve the course from the file name, normalize
/// the header, then run every data row through match+merge independently.
/// A bad row lands in the failure list; it never stops the batch.
fn handle_scores_import_file(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(file_path) = req.params.get("filePath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing filePath", None);
    };
    let file_name = req
        .params
        .get("fileName")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or_else(|| {
            Path::new(file_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file_path.to_string())
        });
    let delimiter = match req.params.get("delimiter").and_then(|v| v.as_str()) {
        None => b',',
        Some(d) if d.len() == 1 && d.is_ascii() => d.as_bytes()[0],
        Some(_) => {
            return err(
                &req.id,
                "bad_params",
                "delimiter must be a single ASCII character",
                None,
            )
        }
    };

    let bytes = match std::fs::read(file_path) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "file_read_failed",
                e.to_string(),
                Some(json!({ "filePath": file_path })),
            )
        }
    };

    // Batch-fatal stage: course id, table shape, score columns. Nothing is
    // written until all three hold.
    let course = match ingest::resolve_course(&file_name) {
        Ok(c) => c,
        Err(e) => {
            return err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "fileName": file_name })),
            )
        }
    };
    let (header, rows) = match ingest::parse_table(&bytes, delimiter) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "fileName": file_name })),
            )
        }
    };
    let header_map = ingest::map_header(&header);
    if header_map.score_columns.is_empty() {
        let e = ImportError::NoScoreColumnsFound(header.join(","));
        return err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "header": header })),
        );
    }

    info!(
        course = %course.course_id,
        file = %file_name,
        rows = rows.len(),
        weeks = header_map.score_columns.len(),
        "starting score import"
    );

    let mut successful = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for row in &rows {
        let identity = ingest::identity_from_row(row, &header_map);
        match process_row(conn, &course, &header_map, row, &identity) {
            Ok(()) => successful += 1,
            Err(e) => errors.push(json!({
                "identity": identity.describe(),
                "reason": e.to_string(),
            })),
        }
    }

    if errors.is_empty() {
        info!(course = %course.course_id, successful, "score import complete");
    } else {
        warn!(
            course = %course.course_id,
            successful,
            failed = errors.len(),
            "score import finished with failures"
        );
    }

    let failed = errors.len();
    ok(
        &req.id,
        json!({
            "message": format!(
                "processed {} rows for {}",
                successful + failed,
                course.course_id
            ),
            "courseId": course.course_id,
            "successful": successful,
            "failed": failed,
            "errors": errors,
        }),
    )
}

/// One row's identify -> match -> merge chain. Every failure is tagged with
/// the stage it came from via the ImportError variant.
fn process_row(
    conn: &Connection,
    course: &CourseRef,
    header_map: &HeaderMap,
    row: &[String],
    identity: &RowIdentity,
) -> Result<(), ImportError> {
    if identity.is_empty() {
        return Err(ImportError::MissingIdentity);
    }

    let student = db::find_student_by_identity(
        conn,
        identity.email.as_deref(),
        identity.roll_number.as_deref(),
    )
    .map_err(|e| ImportError::PersistenceFailure(e.to_string()))?
    .ok_or_else(|| ImportError::StudentNotFound(identity.describe()))?;
    debug!(
        roll = %student.roll_number,
        email = %student.email,
        "row matched to student"
    );

    let results = ingest::week_results_from_row(row, &header_map.score_columns);
    db::upsert_course_results(conn, &student.id, &course.course_id, &results)
        .map_err(|e| ImportError::PersistenceFailure(e.to_string()))?;
    Ok(())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.importFile" => Some(handle_scores_import_file(state, req)),
        _ => None,
    }
}
