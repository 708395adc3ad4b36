mod test_support;

use serde_json::json;
use test_support::{
    request, request_err, request_ok, send_line, spawn_sidecar, str_at, student_params, temp_dir,
};

#[test]
fn requests_before_workspace_selection_fail_cleanly() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    let code = request_err(&mut stdin, &mut reader, "2", "grades.list", json!({}));
    assert_eq!(code, "no_workspace");
    let code = request_err(&mut stdin, &mut reader, "3", "nope.method", json!({}));
    assert_eq!(code, "not_implemented");

    let bad = send_line(&mut stdin, &mut reader, "{not json");
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("bad_json"));
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schoold-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.create",
        json!({ "name": "Play Group" }),
    );
    let grade_id = str_at(&created, "/grade/id").to_string();
    let classroom_id = str_at(&created, "/classroom/id").to_string();
    assert_eq!(str_at(&created, "/classroom/name"), "Play Group-A");
    assert_eq!(created["grade"]["maxCapacityPerClass"], json!(29));

    let next = request_ok(&mut stdin, &mut reader, "3", "students.nextAdmissionNo", json!({}));
    let admission_no = str_at(&next, "/admissionNo").to_string();
    assert!(admission_no.starts_with("SEC/"));
    assert!(admission_no.ends_with("/0001"));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        student_params(&admission_no, &grade_id, &classroom_id),
    );
    let student_id = str_at(&student, "/student/id").to_string();
    assert_eq!(str_at(&student, "/student/grade/name"), "Play Group");
    assert_eq!(str_at(&student, "/student/classroom/name"), "Play Group-A");
    assert_eq!(student["student"]["registeredBy"], json!("staff-1"));

    let calls = [
        ("grades.list", json!({})),
        ("grades.get", json!({ "gradeId": grade_id })),
        ("classrooms.list", json!({ "gradeId": grade_id })),
        ("classrooms.recount", json!({ "gradeId": grade_id })),
        ("students.list", json!({ "search": "pupil" })),
        ("students.get", json!({ "studentId": student_id })),
        ("students.byClassroom", json!({ "classroomId": classroom_id })),
        ("attendance.list", json!({})),
        ("attendance.summary", json!({ "date": "2024-03-01" })),
        ("attendance.studentHistory", json!({ "studentId": student_id })),
        (
            "attendance.markingSheet",
            json!({ "classroomId": classroom_id, "date": "2024-03-01" }),
        ),
        ("fees.list", json!({})),
        ("fees.student", json!({ "studentId": student_id })),
        ("fees.summary", json!({})),
        ("schedules.week", json!({ "gradeId": grade_id })),
        ("schedules.today", json!({ "gradeId": grade_id, "date": "2024-03-02" })),
        ("staff.list", json!({})),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        request_ok(&mut stdin, &mut reader, &format!("s{}", i), method, params);
    }

    let listed = request_ok(&mut stdin, &mut reader, "5", "grades.list", json!({}));
    assert_eq!(listed["grades"][0]["studentCount"], json!(1));
    assert_eq!(listed["grades"][0]["classrooms"][0]["currentCount"], json!(1));
    assert_eq!(listed["grades"][0]["classrooms"][0]["availableSpots"], json!(28));

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(got["fees"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(got["fees"][0]["description"], json!("Registration fee"));
    assert_eq!(got["fees"][0]["balance"], json!(3000.0));
    assert!(got["student"]["age"].is_i64());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn mutations_require_an_actor() {
    let workspace = temp_dir("schoold-actor");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let anonymous = send_line(
        &mut stdin,
        &mut reader,
        &json!({ "id": "2", "method": "grades.create", "params": { "name": "PP1" } }).to_string(),
    );
    assert_eq!(anonymous["error"]["code"], json!("no_actor"));

    let bad_role = send_line(
        &mut stdin,
        &mut reader,
        &json!({
            "id": "3",
            "method": "grades.create",
            "params": { "name": "PP1" },
            "actor": { "id": "u1", "role": "janitor" }
        })
        .to_string(),
    );
    assert_eq!(bad_role["error"]["code"], json!("bad_params"));

    let legacy = send_line(
        &mut stdin,
        &mut reader,
        &json!({
            "id": "4",
            "method": "grades.create",
            "params": { "name": "PP1" },
            "actor": { "id": "u1", "role": "super_admin" }
        })
        .to_string(),
    );
    assert_eq!(legacy["ok"], json!(true), "{}", legacy);

    let dup = request(&mut stdin, &mut reader, "5", "grades.create", json!({ "name": "PP1" }));
    assert_eq!(dup["error"]["code"], json!("conflict"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "fullName": "No Details" }),
    );
    assert_eq!(missing["error"]["code"], json!("bad_params"));
    let fields = missing["error"]["details"]["fields"]
        .as_array()
        .expect("fields")
        .iter()
        .filter_map(|v| v.as_str())
        .collect::<Vec<_>>();
    assert!(fields.contains(&"admissionNo"));
    assert!(fields.contains(&"parent.phone"));

    let _ = std::fs::remove_dir_all(workspace);
}
