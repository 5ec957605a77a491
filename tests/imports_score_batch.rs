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

#[test]
fn import_merges_week_scores_for_a_known_student() {
    let workspace = temp_dir("enrolld-import-batch");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "rollNumber": "21CE014",
            "name": "Asha Nair",
            "email": "asha.nair@college.edu",
            "branch": "CE",
            "year": "3"
        }),
    );

    let csv_path = workspace.join("ns_noc25_ce38_week.csv");
    std::fs::write(
        &csv_path,
        "ID,Name,Email,Roll,Week 01 Assignment,Week 2\n\
         1,Asha Nair,asha.nair@college.edu,21CE014,7.5,9\n",
    )
    .expect("write csv");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scores.importFile",
        json!({ "filePath": csv_path.to_string_lossy() }),
    );
    assert_eq!(
        report.get("courseId").and_then(|v| v.as_str()),
        Some("noc25-ce38")
    );
    assert_eq!(report.get("successful").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(report.get("failed").and_then(|v| v.as_u64()), Some(0));

    // Both canonical weeks must be present in the merged results.
    for (id, week, expected) in [("4", 1u64, 7.5), ("5", 2u64, 9.0)] {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "reports.submissions",
            json!({ "courseId": "noc25-ce38", "week": week }),
        );
        let submitted = result
            .get("submitted")
            .and_then(|v| v.as_array())
            .cloned()
            .expect("submitted list");
        assert_eq!(submitted.len(), 1, "week {}", week);
        assert_eq!(
            submitted[0].get("rollNumber").and_then(|v| v.as_str()),
            Some("21CE014")
        );
        assert_eq!(
            submitted[0].get("score").and_then(|v| v.as_f64()),
            Some(expected)
        );
    }
}

#[test]
fn report_counts_add_up_to_retained_data_rows() {
    let workspace = temp_dir("enrolld-import-counts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, roll) in ["21CS001", "21CS002", "21CS003"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({
                "rollNumber": roll,
                "email": format!("{}@college.edu", roll.to_lowercase()),
            }),
        );
    }

    // Five lines after the header: three matchable, one unknown roll, one
    // trailing short line that the parser must drop.
    let csv_path = workspace.join("noc25_cs52.csv");
    std::fs::write(
        &csv_path,
        "Roll,Email,Week 1\n\
         21CS001,21cs001@college.edu,4\n\
         21CS002,21cs002@college.edu,6\n\
         99XX999,ghost@college.edu,2\n\
         21CS003,21cs003@college.edu,8\n\
         stray\n",
    )
    .expect("write csv");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.importFile",
        json!({ "filePath": csv_path.to_string_lossy() }),
    );
    let successful = report.get("successful").and_then(|v| v.as_u64()).unwrap();
    let failed = report.get("failed").and_then(|v| v.as_u64()).unwrap();
    assert_eq!(successful, 3);
    assert_eq!(failed, 1);
    // The short line never became a data row.
    assert_eq!(successful + failed, 4);
}

#[test]
fn tab_delimited_exports_import_with_an_explicit_delimiter() {
    let workspace = temp_dir("enrolld-import-tsv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "rollNumber": "21ME201", "email": "m201@college.edu" }),
    );

    let tsv_path = workspace.join("me-77.tsv");
    std::fs::write(
        &tsv_path,
        "Roll\tEmail\tWeek 1\n21ME201\tm201@college.edu\t5\n",
    )
    .expect("write tsv");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scores.importFile",
        json!({ "filePath": tsv_path.to_string_lossy(), "delimiter": "\t" }),
    );
    assert_eq!(
        report.get("courseId").and_then(|v| v.as_str()),
        Some("noc25-me77")
    );
    assert_eq!(report.get("successful").and_then(|v| v.as_u64()), Some(1));
}
