mod test_support;

use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, str_at, student_params, temp_dir};

#[test]
fn full_section_is_rejected_and_next_section_is_provisioned() {
    let workspace = temp_dir("schoold-capacity");
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
        json!({ "name": "Grade 1", "maxCapacityPerClass": 2 }),
    );
    let grade_id = str_at(&created, "/grade/id").to_string();
    let a_id = str_at(&created, "/classroom/id").to_string();

    for (i, no) in ["SEC/2024/0001", "SEC/2024/0002"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("e{}", i),
            "students.create",
            student_params(no, &grade_id, &a_id),
        );
    }
    let sections = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classrooms.list",
        json!({ "gradeId": grade_id }),
    );
    assert_eq!(sections["classrooms"][0]["currentCount"], json!(2));
    assert_eq!(sections["classrooms"][0]["isFull"], json!(true));

    let rejected = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        student_params("SEC/2024/0003", &grade_id, &a_id),
    );
    assert_eq!(rejected["error"]["code"], json!("conflict"));

    let allocated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classrooms.allocate",
        json!({ "gradeId": grade_id }),
    );
    assert_eq!(str_at(&allocated, "/classroom/name"), "Grade 1-B");
    assert_eq!(allocated["classroom"]["currentCount"], json!(0));
    let b_id = str_at(&allocated, "/classroom/id").to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        student_params("SEC/2024/0003", &grade_id, &b_id),
    );

    let sections = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "classrooms.list",
        json!({ "gradeId": grade_id }),
    );
    let counts: Vec<_> = sections["classrooms"]
        .as_array()
        .expect("classrooms")
        .iter()
        .map(|c| (c["suffix"].clone(), c["currentCount"].clone()))
        .collect();
    assert_eq!(
        counts,
        vec![(json!("A"), json!(2)), (json!("B"), json!(1))]
    );

    let recount = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "classrooms.recount",
        json!({}),
    );
    assert_eq!(recount["corrections"], json!([]));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn classroom_of_another_grade_is_a_conflict() {
    let workspace = temp_dir("schoold-mismatch");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let g1 = request_ok(&mut stdin, &mut reader, "2", "grades.create", json!({ "name": "PP1" }));
    let g2 = request_ok(&mut stdin, &mut reader, "3", "grades.create", json!({ "name": "PP2" }));

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        student_params(
            "SEC/2024/0001",
            str_at(&g1, "/grade/id"),
            str_at(&g2, "/classroom/id"),
        ),
    );
    assert_eq!(resp["error"]["code"], json!("conflict"));
    assert_eq!(
        resp["error"]["message"],
        json!("classroom does not belong to selected grade")
    );

    let listed = request_ok(&mut stdin, &mut reader, "5", "fees.list", json!({}));
    assert_eq!(listed["fees"], json!([]));

    let _ = std::fs::remove_dir_all(workspace);
}
