use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
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

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let roll_number = match required_str(req, "rollNumber") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = optional_str(req, "name");
    let branch = optional_str(req, "branch");
    let year = optional_str(req, "year");

    let taken: Option<String> = match conn
        .query_row(
            "SELECT id FROM students WHERE roll_number = ?",
            [&roll_number],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "duplicate_roll_number",
            format!("a student with roll number '{}' already exists", roll_number),
            None,
        );
    }

    let student_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, roll_number, name, email, branch, year, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &roll_number,
            &name,
            &email,
            &branch,
            &year,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "rollNumber": roll_number }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut sql = String::from(
        "SELECT
           s.id, s.roll_number, s.name, s.email, s.branch, s.year,
           (SELECT COUNT(*) FROM course_enrollments e WHERE e.student_id = s.id) AS course_count
         FROM students s",
    );
    let mut params: Vec<Value> = Vec::new();
    let mut clauses: Vec<String> = Vec::new();
    if let Some(branch) = optional_str(req, "branch") {
        params.push(Value::Text(branch));
        clauses.push(format!("s.branch = ?{}", params.len()));
    }
    if let Some(year) = optional_str(req, "year") {
        params.push(Value::Text(year));
        clauses.push(format!("s.year = ?{}", params.len()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.roll_number");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let id: String = row.get(0)?;
            let roll_number: String = row.get(1)?;
            let name: Option<String> = row.get(2)?;
            let email: String = row.get(3)?;
            let branch: Option<String> = row.get(4)?;
            let year: Option<String> = row.get(5)?;
            let course_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "rollNumber": roll_number,
                "name": name,
                "email": email,
                "branch": branch,
                "year": year,
                "courseCount": course_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut sets: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    for (param, column) in [
        ("rollNumber", "roll_number"),
        ("name", "name"),
        ("email", "email"),
        ("branch", "branch"),
        ("year", "year"),
    ] {
        if let Some(value) = optional_str(req, param) {
            params.push(Value::Text(value));
            sets.push(format!("{} = ?{}", column, params.len()));
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    if let Some(new_roll) = optional_str(req, "rollNumber") {
        let clash: Option<String> = match conn
            .query_row(
                "SELECT id FROM students WHERE roll_number = ? AND id != ?",
                (&new_roll, &student_id),
                |row| row.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if clash.is_some() {
            return err(
                &req.id,
                "duplicate_roll_number",
                format!("roll number '{}' belongs to another student", new_roll),
                None,
            );
        }
    }

    params.push(Value::Text(chrono::Utc::now().to_rfc3339()));
    sets.push(format!("updated_at = ?{}", params.len()));
    params.push(Value::Text(student_id.clone()));
    let sql = format!(
        "UPDATE students SET {} WHERE id = ?{}",
        sets.join(", "),
        params.len()
    );

    match conn.execute(&sql, params_from_iter(params)) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps = [
        "DELETE FROM week_results WHERE enrollment_id IN
           (SELECT id FROM course_enrollments WHERE student_id = ?)",
        "DELETE FROM course_enrollments WHERE student_id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    let deleted = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "student not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "deleted": true }))
}

// API-side enrollment. Unlike import-created enrollments, a course name is
// required here.
fn handle_students_enroll_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    let course_name = match required_str(req, "courseName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mentor = optional_str(req, "mentor");

    let known: Option<String> = match conn
        .query_row("SELECT id FROM students WHERE id = ?", [&student_id], |row| {
            row.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if known.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let enrolled: Option<String> = match conn
        .query_row(
            "SELECT id FROM course_enrollments WHERE student_id = ? AND course_id = ?",
            (&student_id, &course_id),
            |row| row.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled.is_some() {
        return err(
            &req.id,
            "duplicate_enrollment",
            format!("student already enrolled in '{}'", course_id),
            None,
        );
    }

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO course_enrollments(id, student_id, course_id, course_name, mentor)
         VALUES(?, ?, ?, ?, ?)",
        (&enrollment_id, &student_id, &course_id, &course_name, &mentor),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "course_enrollments" })),
        );
    }

    ok(
        &req.id,
        json!({ "enrollmentId": enrollment_id, "courseId": course_id }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.enrollCourse" => Some(handle_students_enroll_course(state, req)),
        _ => None,
    }
}
