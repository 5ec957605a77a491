use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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
    let exe = env!("CARGO_BIN_EXE_enrolld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn enrolld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
}

#[test]
fn student_lifecycle_and_roll_number_uniqueness() {
    let workspace = temp_dir("enrolld-students");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({
            "rollNumber": "21CS001",
            "name": "Ravi Kumar",
            "email": "ravi@college.edu",
            "branch": "CS",
            "year": "2"
        }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let dup = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "rollNumber": "21CS001", "email": "other@college.edu" }),
    );
    assert_eq!(error_code(&dup), "duplicate_roll_number");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.update",
        json!({ "studentId": student_id, "year": "3" }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "branch": "CS" }),
    );
    let students = listed.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(students.len(), 1);
    assert_eq!(students[0].get("year").and_then(|v| v.as_str()), Some("3"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(
        listed
            .get("students")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
}

#[test]
fn api_enrollment_requires_a_course_name() {
    let workspace = temp_dir("enrolld-enroll");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "rollNumber": "21EE002", "email": "e2@college.edu" }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let missing_name = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.enrollCourse",
        json!({ "studentId": student_id, "courseId": "noc25-ee12" }),
    );
    assert_eq!(error_code(&missing_name), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.enrollCourse",
        json!({
            "studentId": student_id,
            "courseId": "noc25-ee12",
            "courseName": "Circuits"
        }),
    );

    // The same course again, in any case, is a duplicate.
    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.enrollCourse",
        json!({
            "studentId": student_id,
            "courseId": "NOC25-EE12",
            "courseName": "Circuits"
        }),
    );
    assert_eq!(error_code(&dup), "duplicate_enrollment");
}

#[test]
fn faculty_records_round_trip() {
    let workspace = temp_dir("enrolld-faculty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "faculty.create",
        json!({ "name": "Prof. Rao", "department": "CSE" }),
    );
    let faculty_id = created
        .get("facultyId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let dup = request(
        &mut stdin,
        &mut reader,
        "2",
        "faculty.create",
        json!({ "name": "Prof. Rao" }),
    );
    assert_eq!(error_code(&dup), "duplicate_faculty");

    let listed = request_ok(&mut stdin, &mut reader, "3", "faculty.list", json!({}));
    let faculty = listed.get("faculty").and_then(|v| v.as_array()).unwrap();
    assert_eq!(faculty.len(), 1);
    assert_eq!(
        faculty[0].get("department").and_then(|v| v.as_str()),
        Some("CSE")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "faculty.delete",
        json!({ "facultyId": faculty_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "5", "faculty.list", json!({}));
    assert_eq!(
        listed
            .get("faculty")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
}

#[test]
fn requests_before_workspace_selection_are_refused() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "rollNumber": "21CS001", "email": "x@college.edu" }),
    );
    assert_eq!(error_code(&resp), "no_workspace");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "nonsense.method",
        json!({}),
    );
    assert_eq!(error_code(&resp), "not_implemented");
}
