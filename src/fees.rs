use crate::dates::{self, now_timestamp};
use crate::enrollment;
use crate::error::{CoreError, CoreResult};
use crate::model::{BillingType, Fee, FeeStatus, PaymentMethod};
use crate::sequence;
use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const FEE_COLUMNS: &str = "id, student_id, receipt_no, amount, billing_type, description, status,
    due_date, paid_date, paid_amount, payment_method, recorded_by, paid_recorded_by, term, year,
    created_at";

fn fee_from_row(r: &Row<'_>) -> rusqlite::Result<Fee> {
    Ok(Fee {
        id: r.get(0)?,
        student_id: r.get(1)?,
        receipt_no: r.get(2)?,
        amount: r.get(3)?,
        billing_type: r.get(4)?,
        description: r.get(5)?,
        status: r.get(6)?,
        due_date: r.get(7)?,
        paid_date: r.get(8)?,
        paid_amount: r.get(9)?,
        payment_method: r.get(10)?,
        recorded_by: r.get(11)?,
        paid_recorded_by: r.get(12)?,
        term: r.get(13)?,
        year: r.get(14)?,
        created_at: r.get(15)?,
    })
}

/// A fee as returned to callers, with its balance derived.
#[derive(Debug, Clone, Serialize)]
pub struct FeeView {
    #[serde(flatten)]
    pub fee: Fee,
    pub balance: f64,
}

impl From<Fee> for FeeView {
    fn from(fee: Fee) -> Self {
        let balance = fee.balance();
        Self { fee, balance }
    }
}

/// An outstanding obligation ready to insert.
pub struct NewFee {
    pub student_id: String,
    pub amount: f64,
    pub billing_type: BillingType,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub term: Option<String>,
    pub year: i32,
}

pub fn insert_fee(conn: &Connection, new: &NewFee, recorded_by: &str) -> CoreResult<Fee> {
    let fee = Fee {
        id: Uuid::new_v4().to_string(),
        student_id: new.student_id.clone(),
        receipt_no: None,
        amount: new.amount,
        billing_type: new.billing_type,
        description: new.description.clone(),
        status: FeeStatus::Outstanding,
        due_date: new.due_date.clone(),
        paid_date: None,
        paid_amount: 0.0,
        payment_method: None,
        recorded_by: Some(recorded_by.to_string()),
        paid_recorded_by: None,
        term: new.term.clone(),
        year: new.year,
        created_at: now_timestamp(),
    };
    conn.execute(
        &format!(
            "INSERT INTO fees({FEE_COLUMNS})
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        rusqlite::params![
            fee.id,
            fee.student_id,
            fee.receipt_no,
            fee.amount,
            fee.billing_type,
            fee.description,
            fee.status,
            fee.due_date,
            fee.paid_date,
            fee.paid_amount,
            fee.payment_method,
            fee.recorded_by,
            fee.paid_recorded_by,
            fee.term,
            fee.year,
            fee.created_at,
        ],
    )?;
    Ok(fee)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeInput {
    #[serde(alias = "student")]
    pub student_id: Option<String>,
    pub amount: Option<f64>,
    pub billing_type: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub term: Option<String>,
    pub year: Option<i32>,
}

pub fn create_fee(conn: &Connection, input: &FeeInput, actor_id: &str) -> CoreResult<Fee> {
    let mut missing = Vec::new();
    if input.student_id.as_deref().map_or(true, str::is_empty) {
        missing.push("studentId".to_string());
    }
    if input.amount.is_none() {
        missing.push("amount".to_string());
    }
    if input.billing_type.as_deref().map_or(true, str::is_empty) {
        missing.push("billingType".to_string());
    }
    if !missing.is_empty() {
        return Err(CoreError::missing_fields(missing));
    }

    let amount = input.amount.unwrap_or_default();
    if !(amount >= 0.0) {
        return Err(CoreError::invalid("amount", "amount cannot be negative"));
    }
    let billing_type =
        BillingType::parse_field("billingType", input.billing_type.as_deref().unwrap_or_default())?;
    let due_date = match input.due_date.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(dates::format_day(dates::parse_day("dueDate", raw)?)),
        None => None,
    };

    let student = enrollment::get_student(conn, input.student_id.as_deref().unwrap_or_default())?;
    insert_fee(
        conn,
        &NewFee {
            student_id: student.id,
            amount,
            billing_type,
            description: input.description.clone(),
            due_date,
            term: input.term.clone(),
            year: input.year.unwrap_or_else(dates::current_year),
        },
        actor_id,
    )
}

pub fn get_fee(conn: &Connection, fee_id: &str) -> CoreResult<Fee> {
    conn.query_row(
        &format!("SELECT {FEE_COLUMNS} FROM fees WHERE id = ?"),
        [fee_id],
        fee_from_row,
    )
    .optional()?
    .ok_or(CoreError::NotFound("fee"))
}

/// Settles a fee in full and assigns its receipt number.
///
/// The receipt counter increment and the status change commit together, so a failed settlement
/// never burns a receipt number.
pub fn pay_fee(
    conn: &Connection,
    id_prefix: &str,
    fee_id: &str,
    payment_method: Option<&str>,
    actor_id: &str,
) -> CoreResult<Fee> {
    let method = match payment_method.filter(|s| !s.trim().is_empty()) {
        Some(m) => PaymentMethod::parse_field("paymentMethod", m)?,
        None => PaymentMethod::Cash,
    };

    let tx = conn.unchecked_transaction()?;
    let mut fee = get_fee(&tx, fee_id)?;
    if fee.status == FeeStatus::Paid {
        return Err(CoreError::conflict("Fee is already paid"));
    }
    let receipt_no = match fee.receipt_no.take() {
        Some(existing) => existing,
        None => sequence::mint_receipt_no(&tx, id_prefix, dates::current_year())?,
    };

    fee.status = FeeStatus::Paid;
    fee.paid_amount = fee.amount;
    fee.paid_date = Some(now_timestamp());
    fee.payment_method = Some(method);
    fee.paid_recorded_by = Some(actor_id.to_string());
    fee.receipt_no = Some(receipt_no);
    tx.execute(
        "UPDATE fees SET status = ?, paid_amount = ?, paid_date = ?, payment_method = ?,
           paid_recorded_by = ?, receipt_no = ?
         WHERE id = ?",
        rusqlite::params![
            fee.status,
            fee.paid_amount,
            fee.paid_date,
            fee.payment_method,
            fee.paid_recorded_by,
            fee.receipt_no,
            fee.id,
        ],
    )?;
    tx.commit()?;

    info!(
        fee_id = %fee.id,
        receipt_no = fee.receipt_no.as_deref().unwrap_or_default(),
        amount = fee.amount,
        "fee paid"
    );
    Ok(fee)
}

pub fn delete_fee(conn: &Connection, fee_id: &str) -> CoreResult<()> {
    let fee = get_fee(conn, fee_id)?;
    if fee.status == FeeStatus::Paid {
        return Err(CoreError::conflict("Cannot delete a paid fee"));
    }
    conn.execute("DELETE FROM fees WHERE id = ?", [fee_id])?;
    Ok(())
}

pub fn fees_for_student(conn: &Connection, student_id: &str) -> CoreResult<Vec<Fee>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FEE_COLUMNS} FROM fees WHERE student_id = ? ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt
        .query_map([student_id], fee_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeFilter {
    pub status: Option<String>,
    #[serde(alias = "student")]
    pub student_id: Option<String>,
    pub billing_type: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FeeTotals {
    pub outstanding: f64,
    pub paid: f64,
    pub total: f64,
}

impl FeeTotals {
    fn of<'a>(fees: impl IntoIterator<Item = &'a Fee>) -> Self {
        let mut t = Self::default();
        for f in fees {
            t.total += f.amount;
            match f.status {
                FeeStatus::Outstanding => t.outstanding += f.amount,
                FeeStatus::Paid => t.paid += f.paid_amount,
            }
        }
        t
    }

    /// Share of billed money already collected, as a percentage to one decimal.
    pub fn collection_rate(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        (self.paid / self.total * 1000.0).round() / 10.0
    }
}

pub fn list_fees(conn: &Connection, filter: &FeeFilter) -> CoreResult<(Vec<Fee>, FeeTotals)> {
    let status = match filter.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(FeeStatus::parse_field("status", s)?),
        None => None,
    };
    let billing_type = match filter.billing_type.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(BillingType::parse_field("billingType", s)?),
        None => None,
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {FEE_COLUMNS} FROM fees
         WHERE (?1 IS NULL OR status = ?1)
           AND (?2 IS NULL OR student_id = ?2)
           AND (?3 IS NULL OR billing_type = ?3)
           AND (?4 IS NULL OR year = ?4)
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let fees = stmt
        .query_map(
            rusqlite::params![
                status,
                filter.student_id.as_deref().filter(|s| !s.is_empty()),
                billing_type,
                filter.year,
            ],
            fee_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let totals = FeeTotals::of(&fees);
    Ok((fees, totals))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFeeSummary {
    pub outstanding: f64,
    pub paid: f64,
    pub outstanding_count: usize,
    pub paid_count: usize,
}

pub fn student_fees(
    conn: &Connection,
    student_id: &str,
) -> CoreResult<(Vec<Fee>, StudentFeeSummary)> {
    enrollment::get_student(conn, student_id)?;
    let fees = fees_for_student(conn, student_id)?;
    let mut summary = StudentFeeSummary::default();
    for f in &fees {
        match f.status {
            FeeStatus::Outstanding => {
                summary.outstanding += f.amount;
                summary.outstanding_count += 1;
            }
            FeeStatus::Paid => {
                summary.paid += f.paid_amount;
                summary.paid_count += 1;
            }
        }
    }
    Ok((fees, summary))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeLine {
    #[serde(flatten)]
    pub fee: FeeView,
    pub student_name: String,
    pub admission_no: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSummary {
    pub year: i32,
    pub totals: FeeTotals,
    pub collection_rate: f64,
    pub top_outstanding: Vec<FeeLine>,
    pub recent_payments: Vec<FeeLine>,
}

fn fee_lines(
    conn: &Connection,
    where_order: &str,
    params: impl rusqlite::Params,
) -> CoreResult<Vec<FeeLine>> {
    let cols = FEE_COLUMNS
        .split(',')
        .map(|c| format!("f.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {cols}, s.full_name, s.admission_no
         FROM fees f JOIN students s ON s.id = f.student_id
         {where_order}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, |r| {
            Ok(FeeLine {
                fee: fee_from_row(r)?.into(),
                student_name: r.get(16)?,
                admission_no: r.get(17)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Year dashboard: totals, collection rate, the ten largest outstanding fees and the last 30
/// days of payments.
pub fn year_summary(conn: &Connection, year: i32) -> CoreResult<YearSummary> {
    let (_, totals) = list_fees(
        conn,
        &FeeFilter {
            year: Some(year),
            ..Default::default()
        },
    )?;

    let top_outstanding = fee_lines(
        conn,
        "WHERE f.year = ?1 AND f.status = 'outstanding'
         ORDER BY f.amount DESC, f.created_at
         LIMIT 10",
        [year],
    )?;
    let since = (Utc::now() - Duration::days(30)).to_rfc3339_opts(SecondsFormat::Millis, true);
    let recent_payments = fee_lines(
        conn,
        "WHERE f.year = ?1 AND f.status = 'paid' AND f.paid_date >= ?2
         ORDER BY f.paid_date DESC
         LIMIT 10",
        rusqlite::params![year, since],
    )?;

    Ok(YearSummary {
        year,
        totals,
        collection_rate: totals.collection_rate(),
        top_outstanding,
        recent_payments,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub fee: FeeView,
    pub student: enrollment::StudentView,
}

/// Printable receipt of a settled fee.
pub fn receipt(conn: &Connection, fee_id: &str) -> CoreResult<Receipt> {
    let fee = get_fee(conn, fee_id)?;
    if fee.status != FeeStatus::Paid {
        return Err(CoreError::conflict("Receipt is only available for paid fees"));
    }
    let student = enrollment::populate(conn, enrollment::get_student(conn, &fee.student_id)?)?;
    Ok(Receipt {
        fee: fee.into(),
        student,
    })
}
