//! Student aggregate: the student row, its classroom occupancy and its registration fee.
//!
//! Every write here runs in one transaction so the classroom counter, the student row and the
//! fee rows move together.

use crate::allocator;
use crate::config::SchoolConfig;
use crate::dates::{self, now_timestamp};
use crate::error::{unique_or_db, CoreError, CoreResult};
use crate::fees::{self, NewFee};
use crate::grades;
use crate::model::{
    BillingType, Classroom, Gender, InitialFee, Parent, Relationship, Student, StudentStatus,
};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;
use uuid::Uuid;

const STUDENT_COLUMNS: &str = "id, admission_no, full_name, gender, date_of_birth, photo,
    grade_id, classroom_id, parent_full_name, parent_relationship, parent_phone,
    parent_location, parent_email, parent_alternative_contact, initial_fee_amount,
    initial_fee_billing_type, admission_date, status, registered_by, created_at, updated_at";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        admission_no: r.get(1)?,
        full_name: r.get(2)?,
        gender: r.get(3)?,
        date_of_birth: r.get(4)?,
        photo: r.get(5)?,
        grade_id: r.get(6)?,
        classroom_id: r.get(7)?,
        parent: Parent {
            full_name: r.get(8)?,
            relationship: r.get(9)?,
            phone: r.get(10)?,
            location: r.get(11)?,
            email: r.get(12)?,
            alternative_contact: r.get(13)?,
        },
        initial_fee: InitialFee {
            amount: r.get(14)?,
            billing_type: r.get(15)?,
        },
        admission_date: r.get(16)?,
        status: r.get(17)?,
        registered_by: r.get(18)?,
        created_at: r.get(19)?,
        updated_at: r.get(20)?,
    })
}

/// Form submissions may carry sub-documents as JSON text instead of nested objects.
pub(crate) fn json_or_string<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentInput {
    pub full_name: Option<String>,
    pub relationship: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub alternative_contact: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialFeeInput {
    pub amount: Option<f64>,
    pub billing_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    pub admission_no: Option<String>,
    pub full_name: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    #[serde(alias = "gradeId")]
    pub grade: Option<String>,
    #[serde(alias = "classroomId")]
    pub classroom: Option<String>,
    #[serde(default, deserialize_with = "json_or_string")]
    pub parent: Option<ParentInput>,
    #[serde(default, deserialize_with = "json_or_string")]
    pub initial_fee: Option<InitialFeeInput>,
    pub photo: Option<String>,
    pub status: Option<String>,
    pub admission_date: Option<String>,
}

pub(crate) fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn normalize_email(v: &Option<String>) -> Option<String> {
    non_blank(v).map(|s| s.to_lowercase())
}

/// Everything needed to insert a student, validated.
struct NewStudent {
    admission_no: String,
    full_name: String,
    gender: Gender,
    date_of_birth: String,
    grade_id: String,
    classroom_id: String,
    parent: Parent,
    initial_fee: InitialFee,
    photo: Option<String>,
    admission_date: String,
}

fn validate_new(cfg: &SchoolConfig, input: &StudentInput) -> CoreResult<NewStudent> {
    let parent = input.parent.clone().unwrap_or_default();
    let fee = input.initial_fee.clone().unwrap_or_default();

    let required = [
        ("admissionNo", non_blank(&input.admission_no)),
        ("fullName", non_blank(&input.full_name)),
        ("gender", non_blank(&input.gender)),
        ("dateOfBirth", non_blank(&input.date_of_birth)),
        ("grade", non_blank(&input.grade)),
        ("classroom", non_blank(&input.classroom)),
        ("parent.fullName", non_blank(&parent.full_name)),
        ("parent.relationship", non_blank(&parent.relationship)),
        ("parent.phone", non_blank(&parent.phone)),
        ("initialFee.billingType", non_blank(&fee.billing_type)),
    ];
    let mut missing: Vec<String> = required
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| k.to_string())
        .collect();
    if fee.amount.is_none() {
        missing.push("initialFee.amount".to_string());
    }
    if !missing.is_empty() {
        return Err(CoreError::missing_fields(missing));
    }

    // All present from here on.
    let take = |v: &Option<String>| non_blank(v).unwrap_or_default();
    let amount = fee.amount.unwrap_or_default();
    if !(amount >= 0.0) {
        return Err(CoreError::invalid(
            "initialFee.amount",
            "initialFee.amount cannot be negative",
        ));
    }
    let dob = dates::parse_day("dateOfBirth", &take(&input.date_of_birth))?;
    let admission_date = match non_blank(&input.admission_date) {
        Some(s) => dates::parse_day("admissionDate", &s)?,
        None => dates::today(),
    };

    Ok(NewStudent {
        admission_no: take(&input.admission_no),
        full_name: take(&input.full_name),
        gender: Gender::parse_field("gender", &take(&input.gender))?,
        date_of_birth: dates::format_day(dob),
        grade_id: take(&input.grade),
        classroom_id: take(&input.classroom),
        parent: Parent {
            full_name: take(&parent.full_name),
            relationship: Relationship::parse_field(
                "parent.relationship",
                &take(&parent.relationship),
            )?,
            phone: take(&parent.phone),
            location: non_blank(&parent.location),
            email: normalize_email(&parent.email),
            alternative_contact: non_blank(&parent.alternative_contact),
        },
        initial_fee: InitialFee {
            amount,
            billing_type: BillingType::parse_field(
                "initialFee.billingType",
                &take(&fee.billing_type),
            )?,
        },
        photo: input.photo.as_deref().and_then(|p| cfg.photo_path(p)),
        admission_date: dates::format_day(admission_date),
    })
}

pub fn get_student(conn: &Connection, student_id: &str) -> CoreResult<Student> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?"),
        [student_id],
        student_from_row,
    )
    .optional()?
    .ok_or(CoreError::NotFound("student"))
}

fn admission_no_taken(
    conn: &Connection,
    admission_no: &str,
    except: Option<&str>,
) -> CoreResult<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE admission_no = ?",
            [admission_no],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match (found, except) {
        (Some(id), Some(me)) => id != me,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

/// Loads the selected classroom and checks it can take one more student of `grade_id`.
fn selectable_classroom(
    conn: &Connection,
    grade_id: &str,
    classroom_id: &str,
) -> CoreResult<Classroom> {
    let classroom = allocator::get_classroom(conn, classroom_id)?;
    if classroom.grade_id != grade_id {
        return Err(CoreError::conflict(
            "classroom does not belong to selected grade",
        ));
    }
    if classroom.is_full() {
        return Err(CoreError::conflict(format!(
            "classroom is full: {} ({}/{})",
            classroom.name, classroom.current_count, classroom.capacity
        )));
    }
    Ok(classroom)
}

/// Enrolls a student into an explicitly selected classroom and bills the registration fee.
pub fn create_student(
    conn: &Connection,
    cfg: &SchoolConfig,
    input: &StudentInput,
    actor_id: &str,
) -> CoreResult<Student> {
    let new = validate_new(cfg, input)?;

    let tx = conn.unchecked_transaction()?;
    if admission_no_taken(&tx, &new.admission_no, None)? {
        return Err(CoreError::conflict("Admission number already exists"));
    }
    grades::get_grade(&tx, &new.grade_id)?;
    let classroom = selectable_classroom(&tx, &new.grade_id, &new.classroom_id)?;

    allocator::occupy(&tx, &classroom.id)?;

    let now = now_timestamp();
    let student = Student {
        id: Uuid::new_v4().to_string(),
        admission_no: new.admission_no,
        full_name: new.full_name,
        gender: new.gender,
        date_of_birth: new.date_of_birth,
        photo: new.photo,
        grade_id: new.grade_id,
        classroom_id: classroom.id.clone(),
        parent: new.parent,
        initial_fee: new.initial_fee,
        admission_date: new.admission_date,
        status: StudentStatus::Active,
        registered_by: Some(actor_id.to_string()),
        created_at: now.clone(),
        updated_at: now,
    };
    insert_student(&tx, &student)?;

    fees::insert_fee(
        &tx,
        &NewFee {
            student_id: student.id.clone(),
            amount: student.initial_fee.amount,
            billing_type: student.initial_fee.billing_type,
            description: Some("Registration fee".to_string()),
            due_date: None,
            term: None,
            year: dates::current_year(),
        },
        actor_id,
    )?;
    tx.commit()?;

    info!(
        admission_no = %student.admission_no,
        classroom = %classroom.name,
        "enrolled student"
    );
    Ok(student)
}

fn insert_student(conn: &Connection, s: &Student) -> CoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO students({STUDENT_COLUMNS})
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        rusqlite::params![
            s.id,
            s.admission_no,
            s.full_name,
            s.gender,
            s.date_of_birth,
            s.photo,
            s.grade_id,
            s.classroom_id,
            s.parent.full_name,
            s.parent.relationship,
            s.parent.phone,
            s.parent.location,
            s.parent.email,
            s.parent.alternative_contact,
            s.initial_fee.amount,
            s.initial_fee.billing_type,
            s.admission_date,
            s.status,
            s.registered_by,
            s.created_at,
            s.updated_at,
        ],
    )
    .map_err(|e| unique_or_db(e, "Admission number already exists"))?;
    Ok(())
}

/// Applies a partial update.
///
/// A grade change requires an explicit classroom of the new grade. A classroom change within
/// the same grade moves the occupancy from the old section to the new one.
pub fn update_student(
    conn: &Connection,
    cfg: &SchoolConfig,
    student_id: &str,
    input: &StudentInput,
) -> CoreResult<Student> {
    let tx = conn.unchecked_transaction()?;
    let mut s = get_student(&tx, student_id)?;

    let new_grade = non_blank(&input.grade).filter(|g| *g != s.grade_id);
    let new_classroom = non_blank(&input.classroom);

    if let Some(grade_id) = new_grade {
        let Some(classroom_id) = new_classroom else {
            return Err(CoreError::Validation {
                message: "classroom is required when changing grade".to_string(),
                fields: vec!["classroom".to_string()],
            });
        };
        grades::get_grade(&tx, &grade_id)?;
        let target = selectable_classroom(&tx, &grade_id, &classroom_id)?;
        allocator::release(&tx, &s.classroom_id)?;
        allocator::occupy(&tx, &target.id)?;
        info!(student = %s.admission_no, classroom = %target.name, "moved student to new grade");
        s.grade_id = grade_id;
        s.classroom_id = target.id;
    } else if let Some(classroom_id) = new_classroom.filter(|c| *c != s.classroom_id) {
        let target = selectable_classroom(&tx, &s.grade_id, &classroom_id)?;
        allocator::release(&tx, &s.classroom_id)?;
        allocator::occupy(&tx, &target.id)?;
        info!(student = %s.admission_no, classroom = %target.name, "moved student to new section");
        s.classroom_id = target.id;
    }

    if let Some(no) = non_blank(&input.admission_no) {
        if no != s.admission_no && admission_no_taken(&tx, &no, Some(&s.id))? {
            return Err(CoreError::conflict("Admission number already exists"));
        }
        s.admission_no = no;
    }
    if let Some(name) = non_blank(&input.full_name) {
        s.full_name = name;
    }
    if let Some(g) = non_blank(&input.gender) {
        s.gender = Gender::parse_field("gender", &g)?;
    }
    if let Some(d) = non_blank(&input.date_of_birth) {
        s.date_of_birth = dates::format_day(dates::parse_day("dateOfBirth", &d)?);
    }
    if let Some(d) = non_blank(&input.admission_date) {
        s.admission_date = dates::format_day(dates::parse_day("admissionDate", &d)?);
    }
    if let Some(st) = non_blank(&input.status) {
        s.status = StudentStatus::parse_field("status", &st)?;
    }
    if let Some(photo) = input.photo.as_deref().and_then(|p| cfg.photo_path(p)) {
        s.photo = Some(photo);
    }
    if let Some(p) = &input.parent {
        if let Some(v) = non_blank(&p.full_name) {
            s.parent.full_name = v;
        }
        if let Some(v) = non_blank(&p.relationship) {
            s.parent.relationship = Relationship::parse_field("parent.relationship", &v)?;
        }
        if let Some(v) = non_blank(&p.phone) {
            s.parent.phone = v;
        }
        if p.location.is_some() {
            s.parent.location = non_blank(&p.location);
        }
        if p.email.is_some() {
            s.parent.email = normalize_email(&p.email);
        }
        if p.alternative_contact.is_some() {
            s.parent.alternative_contact = non_blank(&p.alternative_contact);
        }
    }
    if let Some(f) = &input.initial_fee {
        if let Some(amount) = f.amount {
            if !(amount >= 0.0) {
                return Err(CoreError::invalid(
                    "initialFee.amount",
                    "initialFee.amount cannot be negative",
                ));
            }
            s.initial_fee.amount = amount;
        }
        if let Some(bt) = non_blank(&f.billing_type) {
            s.initial_fee.billing_type =
                BillingType::parse_field("initialFee.billingType", &bt)?;
        }
    }
    s.updated_at = now_timestamp();

    tx.execute(
        "UPDATE students SET admission_no = ?, full_name = ?, gender = ?, date_of_birth = ?,
           photo = ?, grade_id = ?, classroom_id = ?, parent_full_name = ?,
           parent_relationship = ?, parent_phone = ?, parent_location = ?, parent_email = ?,
           parent_alternative_contact = ?, initial_fee_amount = ?, initial_fee_billing_type = ?,
           admission_date = ?, status = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            s.admission_no,
            s.full_name,
            s.gender,
            s.date_of_birth,
            s.photo,
            s.grade_id,
            s.classroom_id,
            s.parent.full_name,
            s.parent.relationship,
            s.parent.phone,
            s.parent.location,
            s.parent.email,
            s.parent.alternative_contact,
            s.initial_fee.amount,
            s.initial_fee.billing_type,
            s.admission_date,
            s.status,
            s.updated_at,
            s.id,
        ],
    )
    .map_err(|e| unique_or_db(e, "Admission number already exists"))?;
    tx.commit()?;
    Ok(s)
}

/// Removes the student and its fees and frees its classroom seat. Attendance marks are kept.
pub fn delete_student(conn: &Connection, student_id: &str) -> CoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    let s = get_student(&tx, student_id)?;
    allocator::release(&tx, &s.classroom_id)?;
    let fees_removed = tx.execute("DELETE FROM fees WHERE student_id = ?", [&s.id])?;
    tx.execute("DELETE FROM students WHERE id = ?", [&s.id])?;
    tx.commit()?;

    info!(admission_no = %s.admission_no, fees_removed, "deleted student");
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFilter {
    #[serde(alias = "grade")]
    pub grade_id: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
}

/// Substring pattern for a `LIKE` that escapes with a backslash.
pub(crate) fn like_pattern(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Filtered student list, newest first. `search` matches name, admission number or parent name.
pub fn list_students(conn: &Connection, filter: &StudentFilter) -> CoreResult<Vec<Student>> {
    let status = match non_blank(&filter.status) {
        Some(s) => Some(StudentStatus::parse_field("status", &s)?),
        None => None,
    };
    let pattern = non_blank(&filter.search).map(|s| like_pattern(&s));

    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students
         WHERE (?1 IS NULL OR grade_id = ?1)
           AND (?2 IS NULL OR status = ?2)
           AND (?3 IS NULL
                OR full_name LIKE ?3 ESCAPE '\\'
                OR admission_no LIKE ?3 ESCAPE '\\'
                OR parent_full_name LIKE ?3 ESCAPE '\\')
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![non_blank(&filter.grade_id), status, pattern],
            student_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active students of one classroom by name, as shown on marking sheets.
pub fn students_in_classroom(conn: &Connection, classroom_id: &str) -> CoreResult<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students
         WHERE classroom_id = ? AND status = 'active'
         ORDER BY full_name"
    ))?;
    let rows = stmt
        .query_map([classroom_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedRef {
    pub id: String,
    pub name: String,
}

/// A student with grade and classroom names resolved and age derived.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    #[serde(flatten)]
    pub student: Student,
    pub grade: Option<NamedRef>,
    pub classroom: Option<NamedRef>,
    pub age: Option<i32>,
}

pub(crate) fn name_of(conn: &Connection, table: &str, id: &str) -> CoreResult<Option<NamedRef>> {
    let sql = format!("SELECT name FROM {} WHERE id = ?", table);
    let name: Option<String> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(name.map(|name| NamedRef {
        id: id.to_string(),
        name,
    }))
}

pub fn populate(conn: &Connection, student: Student) -> CoreResult<StudentView> {
    let grade = name_of(conn, "grades", &student.grade_id)?;
    let classroom = name_of(conn, "classrooms", &student.classroom_id)?;
    let age = chrono::NaiveDate::parse_from_str(&student.date_of_birth, "%Y-%m-%d")
        .ok()
        .map(|dob| dates::age_on(dob, dates::today()));
    Ok(StudentView {
        student,
        grade,
        classroom,
        age,
    })
}
