//! Year-scoped identifiers printed on school records.
//!
//! Admission numbers look like `SEC/2024/0007` and receipts like `SEC-2024-0012`.

use crate::error::CoreResult;
use rusqlite::{Connection, OptionalExtension};

pub fn format_admission_no(prefix: &str, year: i32, seq: i64) -> String {
    format!("{}/{}/{:04}", prefix, year, seq)
}

pub fn format_receipt_no(prefix: &str, year: i32, seq: i64) -> String {
    format!("{}-{}-{:04}", prefix, year, seq)
}

/// Trailing sequence of an identifier that starts with `head`, e.g. `SEC-2024-` + `0012`.
fn trailing_seq(id: &str, head: &str) -> Option<i64> {
    id.strip_prefix(head)?.parse::<i64>().ok()
}

/// Highest sequence among ids starting with `head` in `table.column`.
fn max_existing_seq(conn: &Connection, table: &str, column: &str, head: &str) -> CoreResult<i64> {
    let sql = format!(
        "SELECT {column} FROM {table} WHERE {column} IS NOT NULL AND substr({column}, 1, ?) = ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map((head.chars().count() as i64, head), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids
        .iter()
        .filter_map(|id| trailing_seq(id, head))
        .max()
        .unwrap_or(0))
}

/// Suggests the next admission number for `year`. Nothing is reserved: admission numbers are
/// human-assigned and only checked for uniqueness when the student is created.
pub fn next_admission_no(conn: &Connection, prefix: &str, year: i32) -> CoreResult<String> {
    let head = format!("{}/{}/", prefix, year);
    let last = max_existing_seq(conn, "students", "admission_no", &head)?;
    Ok(format_admission_no(prefix, year, last + 1))
}

/// Mints the next receipt number for `year` from the `sequences` counter row.
///
/// The increment is a single UPSERT, so two settlements can never read the same value. The row
/// is seeded from the highest receipt already on file the first time a year is used.
pub fn mint_receipt_no(conn: &Connection, prefix: &str, year: i32) -> CoreResult<String> {
    let key = format!("receipt:{}:{}", prefix, year);
    let exists = conn
        .query_row("SELECT 1 FROM sequences WHERE key = ?", [&key], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        let head = format!("{}-{}-", prefix, year);
        let seed = max_existing_seq(conn, "fees", "receipt_no", &head)?;
        conn.execute(
            "INSERT OR IGNORE INTO sequences(key, value) VALUES(?, ?)",
            (&key, seed),
        )?;
    }
    let value: i64 = conn.query_row(
        "INSERT INTO sequences(key, value) VALUES(?, 1)
         ON CONFLICT(key) DO UPDATE SET value = value + 1
         RETURNING value",
        [&key],
        |r| r.get(0),
    )?;
    Ok(format_receipt_no(prefix, year, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn identifiers_are_zero_padded() {
        assert_eq!(format_admission_no("SEC", 2024, 7), "SEC/2024/0007");
        assert_eq!(format_receipt_no("SEC", 2024, 12), "SEC-2024-0012");
        assert_eq!(format_receipt_no("SEC", 2024, 12345), "SEC-2024-12345");
    }

    #[test]
    fn receipt_counter_is_per_year_and_monotonic() {
        let conn = db::open_memory();
        assert_eq!(mint_receipt_no(&conn, "SEC", 2024).unwrap(), "SEC-2024-0001");
        assert_eq!(mint_receipt_no(&conn, "SEC", 2024).unwrap(), "SEC-2024-0002");
        assert_eq!(mint_receipt_no(&conn, "SEC", 2025).unwrap(), "SEC-2025-0001");
        assert_eq!(mint_receipt_no(&conn, "SEC", 2024).unwrap(), "SEC-2024-0003");
    }

    #[test]
    fn receipt_counter_seeds_from_existing_receipts() {
        let conn = db::open_memory();
        conn.execute(
            "INSERT INTO grades(id, name, sort_order, created_at) VALUES('g', 'G', 1, 'now')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO classrooms(id, grade_id, name, suffix, capacity, created_at)
             VALUES('c', 'g', 'G-A', 'A', 29, 'now')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO students(id, admission_no, full_name, gender, date_of_birth, grade_id,
               classroom_id, parent_full_name, parent_relationship, parent_phone,
               initial_fee_amount, initial_fee_billing_type, admission_date, created_at, updated_at)
             VALUES('s', 'SEC/2024/0001', 'A', 'male', '2018-01-01', 'g', 'c', 'P', 'father',
               '0700', 10, 'once', 'now', 'now', 'now')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO fees(id, student_id, receipt_no, amount, billing_type, status, year,
               created_at)
             VALUES('f1', 's', 'SEC-2024-0041', 10, 'once', 'paid', 2024, 'now')",
            [],
        )
        .unwrap();

        assert_eq!(mint_receipt_no(&conn, "SEC", 2024).unwrap(), "SEC-2024-0042");
        assert_eq!(
            next_admission_no(&conn, "SEC", 2024).unwrap(),
            "SEC/2024/0002"
        );
        assert_eq!(
            next_admission_no(&conn, "SEC", 2025).unwrap(),
            "SEC/2025/0001"
        );
    }
}
