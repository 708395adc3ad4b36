mod test_support;

use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, str_at, student_params, temp_dir};

fn current_year() -> i32 {
    use chrono::Datelike;
    chrono::Local::now().year()
}

#[test]
fn pay_once_delete_never_and_receipts_increase() {
    let workspace = temp_dir("schoold-fees");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let grade = request_ok(&mut stdin, &mut reader, "2", "grades.create", json!({ "name": "PP2" }));
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        student_params(
            "SEC/2024/0001",
            str_at(&grade, "/grade/id"),
            str_at(&grade, "/classroom/id"),
        ),
    );
    let student_id = str_at(&student, "/student/id").to_string();

    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.create",
        json!({ "studentId": student_id, "amount": 5000, "billingType": "term", "term": "Term 1" }),
    );
    let fee_id = str_at(&fee, "/fee/id").to_string();
    assert_eq!(fee["fee"]["status"], json!("outstanding"));
    assert_eq!(fee["fee"]["receiptNo"], json!(null));

    let paid = request_ok(&mut stdin, &mut reader, "5", "fees.pay", json!({ "feeId": fee_id }));
    assert_eq!(paid["fee"]["status"], json!("paid"));
    assert_eq!(paid["fee"]["paidAmount"], json!(5000.0));
    assert_eq!(paid["fee"]["paymentMethod"], json!("cash"));
    assert_eq!(paid["fee"]["balance"], json!(0.0));
    let first_receipt = format!("SEC-{}-0001", current_year());
    assert_eq!(paid["fee"]["receiptNo"], json!(first_receipt));

    let again = request(
        &mut stdin,
        &mut reader,
        "6",
        "fees.pay",
        json!({ "feeId": fee_id, "paymentMethod": "cheque" }),
    );
    assert_eq!(again["error"]["code"], json!("conflict"));
    let stored = request_ok(&mut stdin, &mut reader, "7", "fees.get", json!({ "feeId": fee_id }));
    assert_eq!(stored["fee"]["receiptNo"], json!(first_receipt));
    assert_eq!(stored["fee"]["paymentMethod"], json!("cash"));

    let delete_paid = request(
        &mut stdin,
        &mut reader,
        "8",
        "fees.delete",
        json!({ "feeId": fee_id }),
    );
    assert_eq!(delete_paid["error"]["code"], json!("conflict"));
    let stored = request_ok(&mut stdin, &mut reader, "9", "fees.get", json!({ "feeId": fee_id }));
    assert_eq!(stored["fee"]["status"], json!("paid"));

    // The registration fee was created first but is settled second.
    let fees = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "fees.student",
        json!({ "studentId": student_id }),
    );
    let registration = fees["fees"]
        .as_array()
        .expect("fees")
        .iter()
        .find(|f| f["description"] == json!("Registration fee"))
        .expect("registration fee")
        .clone();
    let reg_paid = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "fees.pay",
        json!({ "feeId": registration["id"], "paymentMethod": "mobile_money" }),
    );
    assert_eq!(
        reg_paid["fee"]["receiptNo"],
        json!(format!("SEC-{}-0002", current_year()))
    );

    let receipt = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "fees.receipt",
        json!({ "feeId": fee_id }),
    );
    assert_eq!(receipt["student"]["admissionNo"], json!("SEC/2024/0001"));
    assert_eq!(receipt["student"]["grade"]["name"], json!("PP2"));

    let summary = request_ok(&mut stdin, &mut reader, "13", "fees.summary", json!({}));
    assert_eq!(summary["totals"]["paid"], json!(8000.0));
    assert_eq!(summary["collectionRate"], json!(100.0));

    let _ = std::fs::remove_dir_all(workspace);
}
