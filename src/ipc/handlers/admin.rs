use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::warn;

fn handle_delete_all_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match db::delete_all_students(conn) {
        Ok(deleted) => {
            warn!(deleted, "all student records deleted");
            ok(&req.id, json!({ "deleted": deleted }))
        }
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_reset_course_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match db::reset_all_course_results(conn) {
        Ok(cleared) => {
            warn!(cleared, "all course results cleared");
            ok(&req.id, json!({ "cleared": cleared }))
        }
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.deleteAllStudents" => Some(handle_delete_all_students(state, req)),
        "admin.resetCourseResults" => Some(handle_reset_course_results(state, req)),
        _ => None,
    }
}
