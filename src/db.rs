use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::ingest::WeekResult;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("enrolld.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            roll_number TEXT NOT NULL UNIQUE,
            name TEXT,
            email TEXT NOT NULL,
            branch TEXT,
            year TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_email ON students(email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            email TEXT,
            department TEXT
        )",
        [],
    )?;

    // course_id is stored lower-case; NOCASE keeps the uniqueness invariant
    // even if an older row slipped through with mixed case.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL COLLATE NOCASE,
            course_name TEXT,
            mentor TEXT,
            UNIQUE(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_enrollments_mentor(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON course_enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON course_enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS week_results(
            enrollment_id TEXT NOT NULL,
            week_label TEXT NOT NULL,
            score REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(enrollment_id, sort_order),
            FOREIGN KEY(enrollment_id) REFERENCES course_enrollments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_week_results_enrollment ON week_results(enrollment_id)",
        [],
    )?;

    Ok(conn)
}

// Early workspaces predate the mentor column. Add it when missing.
fn ensure_enrollments_mentor(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "course_enrollments", "mentor")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE course_enrollments ADD COLUMN mentor TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Clone)]
pub struct StudentRef {
    pub id: String,
    pub roll_number: String,
    pub email: String,
}

/// The identity-matching cascade, most strict first. A later strategy runs
/// only when every earlier one found nothing.
#[derive(Debug, Clone, Copy)]
enum IdentityStrategy {
    Exact,
    CaseInsensitive,
    EmailLocalPrefix,
}

const IDENTITY_CASCADE: &[IdentityStrategy] = &[
    IdentityStrategy::Exact,
    IdentityStrategy::CaseInsensitive,
    IdentityStrategy::EmailLocalPrefix,
];

/// Resolve an uploaded row's identity to a stored student.
///
/// Ties inside one strategy (emails are not unique) go to the earliest
/// stored record.
pub fn find_student_by_identity(
    conn: &Connection,
    email: Option<&str>,
    roll_number: Option<&str>,
) -> anyhow::Result<Option<StudentRef>> {
    for strategy in IDENTITY_CASCADE {
        let Some((clause, params)) = strategy.query(email, roll_number) else {
            continue;
        };
        let sql = format!(
            "SELECT id, roll_number, email FROM students WHERE {} ORDER BY rowid LIMIT 1",
            clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let hit = stmt
            .query_row(params_from_iter(params), |row| {
                Ok(StudentRef {
                    id: row.get(0)?,
                    roll_number: row.get(1)?,
                    email: row.get(2)?,
                })
            })
            .optional()?;
        if hit.is_some() {
            return Ok(hit);
        }
    }
    Ok(None)
}

impl IdentityStrategy {
    /// WHERE clause and params for this strategy, or None when the row
    /// lacks the field the strategy needs.
    fn query(self, email: Option<&str>, roll_number: Option<&str>) -> Option<(String, Vec<Value>)> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        match self {
            IdentityStrategy::Exact => {
                if let Some(e) = email {
                    params.push(Value::Text(e.to_string()));
                    clauses.push(format!("email = ?{}", params.len()));
                }
                if let Some(r) = roll_number {
                    params.push(Value::Text(r.to_string()));
                    clauses.push(format!("roll_number = ?{}", params.len()));
                }
            }
            IdentityStrategy::CaseInsensitive => {
                if let Some(e) = email {
                    params.push(Value::Text(e.to_ascii_lowercase()));
                    clauses.push(format!("LOWER(email) = ?{}", params.len()));
                }
                if let Some(r) = roll_number {
                    params.push(Value::Text(r.to_ascii_lowercase()));
                    clauses.push(format!("LOWER(roll_number) = ?{}", params.len()));
                }
            }
            IdentityStrategy::EmailLocalPrefix => {
                let e = email?;
                let local = e.split_once('@').map(|(l, _)| l).unwrap_or(e);
                if local.is_empty() {
                    return None;
                }
                params.push(Value::Text(format!(
                    "{}%",
                    escape_like(&local.to_ascii_lowercase())
                )));
                clauses.push(format!("LOWER(email) LIKE ?{} ESCAPE '\\'", params.len()));
            }
        }

        if clauses.is_empty() {
            return None;
        }
        Some((clauses.join(" OR "), params))
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone)]
pub struct RosterRow {
    pub enrollment_id: String,
    pub roll_number: String,
    pub name: Option<String>,
    pub email: String,
    pub branch: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RosterFilters<'a> {
    pub year: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub faculty_name: Option<&'a str>,
}

/// Students enrolled in a course, optionally narrowed by year, branch and
/// the enrollment's mentor. The course_id comparison is case-insensitive.
pub fn find_students_by_course(
    conn: &Connection,
    course_id: &str,
    filters: RosterFilters,
) -> anyhow::Result<Vec<RosterRow>> {
    let mut sql = String::from(
        "SELECT e.id, s.roll_number, s.name, s.email, s.branch, s.year
         FROM students s
         JOIN course_enrollments e ON e.student_id = s.id
         WHERE e.course_id = ?1",
    );
    let mut params: Vec<Value> = vec![Value::Text(course_id.to_ascii_lowercase())];

    if let Some(year) = filters.year {
        params.push(Value::Text(year.to_string()));
        sql.push_str(&format!(" AND s.year = ?{}", params.len()));
    }
    if let Some(branch) = filters.branch {
        params.push(Value::Text(branch.to_string()));
        sql.push_str(&format!(" AND s.branch = ?{}", params.len()));
    }
    if let Some(mentor) = filters.faculty_name {
        params.push(Value::Text(mentor.to_string()));
        sql.push_str(&format!(" AND e.mentor = ?{}", params.len()));
    }
    sql.push_str(" ORDER BY s.roll_number");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            Ok(RosterRow {
                enrollment_id: row.get(0)?,
                roll_number: row.get(1)?,
                name: row.get(2)?,
                email: row.get(3)?,
                branch: row.get(4)?,
                year: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replace a student's result list for one course wholesale, creating a
/// bare enrollment (no course name, no mentor) when none exists yet.
pub fn upsert_course_results(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    results: &[WeekResult],
) -> anyhow::Result<()> {
    let course_id = course_id.to_ascii_lowercase();
    let tx = conn.unchecked_transaction()?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM course_enrollments WHERE student_id = ? AND course_id = ?",
            (student_id, &course_id),
            |row| row.get(0),
        )
        .optional()?;

    let enrollment_id = match existing {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO course_enrollments(id, student_id, course_id) VALUES(?, ?, ?)",
                (&id, student_id, &course_id),
            )?;
            id
        }
    };

    tx.execute(
        "DELETE FROM week_results WHERE enrollment_id = ?",
        [&enrollment_id],
    )?;
    {
        let mut ins = tx.prepare(
            "INSERT INTO week_results(enrollment_id, week_label, score, sort_order)
             VALUES(?, ?, ?, ?)",
        )?;
        for (sort_order, result) in results.iter().enumerate() {
            ins.execute((
                &enrollment_id,
                &result.week_label,
                result.score,
                sort_order as i64,
            ))?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Ordered (week_label, score) pairs for one enrollment.
pub fn week_results_for_enrollment(
    conn: &Connection,
    enrollment_id: &str,
) -> anyhow::Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT week_label, score FROM week_results
         WHERE enrollment_id = ? ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([enrollment_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drop every student record along with enrollments and results.
pub fn delete_all_students(conn: &Connection) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM week_results", [])?;
    tx.execute("DELETE FROM course_enrollments", [])?;
    let deleted = tx.execute("DELETE FROM students", [])?;
    tx.commit()?;
    Ok(deleted)
}

/// Clear all per-course results but keep students and enrollments.
pub fn reset_all_course_results(conn: &Connection) -> anyhow::Result<usize> {
    let cleared = conn.execute("DELETE FROM week_results", [])?;
    Ok(cleared)
}
