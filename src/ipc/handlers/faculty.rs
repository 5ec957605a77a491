use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn handle_faculty_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = optional_str(req, "email");
    let department = optional_str(req, "department");

    let taken: Option<String> = match conn
        .query_row("SELECT id FROM faculty WHERE name = ?", [&name], |row| {
            row.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "duplicate_faculty",
            format!("faculty '{}' already exists", name),
            None,
        );
    }

    let faculty_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO faculty(id, name, email, department) VALUES(?, ?, ?, ?)",
        (&faculty_id, &name, &email, &department),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "faculty" })),
        );
    }

    ok(&req.id, json!({ "facultyId": faculty_id, "name": name }))
}

fn handle_faculty_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "faculty": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           f.id, f.name, f.email, f.department,
           (SELECT COUNT(DISTINCT e.course_id)
              FROM course_enrollments e WHERE e.mentor = f.name) AS mentored_courses
         FROM faculty f
         ORDER BY f.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let email: Option<String> = row.get(2)?;
            let department: Option<String> = row.get(3)?;
            let mentored_courses: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "email": email,
                "department": department,
                "mentoredCourses": mentored_courses
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(faculty) => ok(&req.id, json!({ "faculty": faculty })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_faculty_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let faculty_id = match required_str(req, "facultyId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute("DELETE FROM faculty WHERE id = ?", [&faculty_id]) {
        Ok(0) => err(&req.id, "not_found", "faculty not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.create" => Some(handle_faculty_create(state, req)),
        "faculty.list" => Some(handle_faculty_list(state, req)),
        "faculty.delete" => Some(handle_faculty_delete(state, req)),
        _ => None,
    }
}
