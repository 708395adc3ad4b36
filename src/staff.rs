//! Staff registry: teachers, head teachers, admins and support staff with their emergency
//! contact. National ID is the natural key.

use crate::config::SchoolConfig;
use crate::dates::{self, now_timestamp};
use crate::enrollment::{
    json_or_string, like_pattern, name_of, non_blank, normalize_email, NamedRef,
};
use crate::error::{unique_or_db, CoreError, CoreResult};
use crate::grades;
use crate::model::{EmergencyContact, Gender, Qualification, Role, Staff, StaffStatus};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;
use uuid::Uuid;

const STAFF_COLUMNS: &str = "id, national_id, full_name, gender, date_of_birth,
    date_of_employment, qualification, role, assigned_grade_id, location, phone, email,
    emergency_full_name, emergency_relationship, emergency_phone, emergency_location,
    emergency_alternative_contact, emergency_signature_date, medical_notes, photo, status,
    registered_by, created_at, updated_at";

const DUPLICATE_NATIONAL_ID: &str = "Staff with this National ID already exists";

fn staff_from_row(r: &Row<'_>) -> rusqlite::Result<Staff> {
    Ok(Staff {
        id: r.get(0)?,
        national_id: r.get(1)?,
        full_name: r.get(2)?,
        gender: r.get(3)?,
        date_of_birth: r.get(4)?,
        date_of_employment: r.get(5)?,
        qualification: r.get(6)?,
        role: r.get(7)?,
        assigned_grade_id: r.get(8)?,
        location: r.get(9)?,
        phone: r.get(10)?,
        email: r.get(11)?,
        emergency_contact: EmergencyContact {
            full_name: r.get(12)?,
            relationship: r.get(13)?,
            phone: r.get(14)?,
            location: r.get(15)?,
            alternative_contact: r.get(16)?,
            signature_date: r.get(17)?,
        },
        medical_notes: r.get(18)?,
        photo: r.get(19)?,
        status: r.get(20)?,
        registered_by: r.get(21)?,
        created_at: r.get(22)?,
        updated_at: r.get(23)?,
    })
}

/// Keeps an explicit `null` apart from an absent key: `Some(None)` clears the value.
fn explicit<'de, D>(d: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(d).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContactInput {
    pub full_name: Option<String>,
    pub relationship: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub alternative_contact: Option<String>,
    pub signature_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffInput {
    pub national_id: Option<String>,
    pub full_name: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub date_of_employment: Option<String>,
    pub qualification: Option<String>,
    pub role: Option<String>,
    /// Absent leaves the assignment alone; `null` or `""` clears it.
    #[serde(default, alias = "assignedGradeId", deserialize_with = "explicit")]
    pub assigned_grade: Option<Option<String>>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "json_or_string")]
    pub emergency_contact: Option<EmergencyContactInput>,
    pub medical_notes: Option<String>,
    pub photo: Option<String>,
    pub status: Option<String>,
}

fn contact_gaps(input: &EmergencyContactInput) -> Vec<String> {
    [
        ("emergencyContact.fullName", &input.full_name),
        ("emergencyContact.relationship", &input.relationship),
        ("emergencyContact.phone", &input.phone),
    ]
    .iter()
    .filter(|(_, v)| non_blank(v).is_none())
    .map(|(k, _)| k.to_string())
    .collect()
}

/// Builds a complete emergency contact, listing every blank required field at once.
fn validate_contact(input: &EmergencyContactInput) -> CoreResult<EmergencyContact> {
    let missing = contact_gaps(input);
    if !missing.is_empty() {
        return Err(CoreError::missing_fields(missing));
    }
    let signature_date = match non_blank(&input.signature_date) {
        Some(s) => dates::parse_day("emergencyContact.signatureDate", &s)?,
        None => dates::today(),
    };
    let take = |v: &Option<String>| non_blank(v).unwrap_or_default();
    Ok(EmergencyContact {
        full_name: take(&input.full_name),
        relationship: take(&input.relationship),
        phone: take(&input.phone),
        location: non_blank(&input.location),
        alternative_contact: non_blank(&input.alternative_contact),
        signature_date: dates::format_day(signature_date),
    })
}

/// Resolves an assignment request to a grade id that exists, or `None` to clear.
fn assigned_grade(conn: &Connection, raw: &Option<String>) -> CoreResult<Option<String>> {
    match non_blank(raw) {
        Some(grade_id) => Ok(Some(grades::get_grade(conn, &grade_id)?.id)),
        None => Ok(None),
    }
}

fn national_id_taken(
    conn: &Connection,
    national_id: &str,
    except: Option<&str>,
) -> CoreResult<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM staff WHERE national_id = ?",
            [national_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match (found, except) {
        (Some(id), Some(me)) => id != me,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

pub fn get_staff(conn: &Connection, staff_id: &str) -> CoreResult<Staff> {
    conn.query_row(
        &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?"),
        [staff_id],
        staff_from_row,
    )
    .optional()?
    .ok_or(CoreError::NotFound("staff"))
}

/// Registers a staff member. The emergency contact is required as a whole.
pub fn create_staff(
    conn: &Connection,
    cfg: &SchoolConfig,
    input: &StaffInput,
    actor_id: &str,
) -> CoreResult<Staff> {
    let required = [
        ("nationalId", non_blank(&input.national_id)),
        ("fullName", non_blank(&input.full_name)),
        ("dateOfBirth", non_blank(&input.date_of_birth)),
        ("qualification", non_blank(&input.qualification)),
        ("role", non_blank(&input.role)),
        ("phone", non_blank(&input.phone)),
    ];
    let mut missing: Vec<String> = required
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| k.to_string())
        .collect();
    let contact = input.emergency_contact.clone().unwrap_or_default();
    missing.extend(contact_gaps(&contact));
    if !missing.is_empty() {
        return Err(CoreError::missing_fields(missing));
    }
    let emergency_contact = validate_contact(&contact)?;

    let take = |v: &Option<String>| non_blank(v).unwrap_or_default();
    let dob = dates::parse_day("dateOfBirth", &take(&input.date_of_birth))?;
    let employed = match non_blank(&input.date_of_employment) {
        Some(s) => dates::parse_day("dateOfEmployment", &s)?,
        None => dates::today(),
    };
    let gender = match non_blank(&input.gender) {
        Some(g) => Some(Gender::parse_field("gender", &g)?),
        None => None,
    };
    let qualification = Qualification::parse_field("qualification", &take(&input.qualification))?;
    let role = Role::parse_field("role", &take(&input.role))?;
    let status = match non_blank(&input.status) {
        Some(s) => StaffStatus::parse_field("status", &s)?,
        None => StaffStatus::Active,
    };

    let tx = conn.unchecked_transaction()?;
    let national_id = take(&input.national_id);
    if national_id_taken(&tx, &national_id, None)? {
        return Err(CoreError::conflict(DUPLICATE_NATIONAL_ID));
    }
    let assigned_grade_id = match &input.assigned_grade {
        Some(raw) => assigned_grade(&tx, raw)?,
        None => None,
    };

    let now = now_timestamp();
    let staff = Staff {
        id: Uuid::new_v4().to_string(),
        national_id,
        full_name: take(&input.full_name),
        gender,
        date_of_birth: dates::format_day(dob),
        date_of_employment: dates::format_day(employed),
        qualification,
        role,
        assigned_grade_id,
        location: non_blank(&input.location),
        phone: take(&input.phone),
        email: normalize_email(&input.email),
        emergency_contact,
        medical_notes: non_blank(&input.medical_notes),
        photo: input.photo.as_deref().and_then(|p| cfg.photo_path(p)),
        status,
        registered_by: Some(actor_id.to_string()),
        created_at: now.clone(),
        updated_at: now,
    };
    insert_staff(&tx, &staff)?;
    tx.commit()?;

    info!(national_id = %staff.national_id, role = staff.role.as_str(), "registered staff member");
    Ok(staff)
}

fn insert_staff(conn: &Connection, s: &Staff) -> CoreResult<()> {
    let c = &s.emergency_contact;
    conn.execute(
        &format!(
            "INSERT INTO staff({STAFF_COLUMNS})
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        rusqlite::params![
            s.id,
            s.national_id,
            s.full_name,
            s.gender,
            s.date_of_birth,
            s.date_of_employment,
            s.qualification,
            s.role,
            s.assigned_grade_id,
            s.location,
            s.phone,
            s.email,
            c.full_name,
            c.relationship,
            c.phone,
            c.location,
            c.alternative_contact,
            c.signature_date,
            s.medical_notes,
            s.photo,
            s.status,
            s.registered_by,
            s.created_at,
            s.updated_at,
        ],
    )
    .map_err(|e| unique_or_db(e, DUPLICATE_NATIONAL_ID))?;
    Ok(())
}

/// Applies a partial update. A supplied emergency contact replaces the stored one and must be
/// complete on its own.
pub fn update_staff(
    conn: &Connection,
    cfg: &SchoolConfig,
    staff_id: &str,
    input: &StaffInput,
) -> CoreResult<Staff> {
    let tx = conn.unchecked_transaction()?;
    let mut s = get_staff(&tx, staff_id)?;

    if let Some(id) = non_blank(&input.national_id) {
        if id != s.national_id && national_id_taken(&tx, &id, Some(&s.id))? {
            return Err(CoreError::conflict(DUPLICATE_NATIONAL_ID));
        }
        s.national_id = id;
    }
    if let Some(v) = non_blank(&input.full_name) {
        s.full_name = v;
    }
    if let Some(g) = non_blank(&input.gender) {
        s.gender = Some(Gender::parse_field("gender", &g)?);
    }
    if let Some(d) = non_blank(&input.date_of_birth) {
        s.date_of_birth = dates::format_day(dates::parse_day("dateOfBirth", &d)?);
    }
    if let Some(d) = non_blank(&input.date_of_employment) {
        s.date_of_employment = dates::format_day(dates::parse_day("dateOfEmployment", &d)?);
    }
    if let Some(q) = non_blank(&input.qualification) {
        s.qualification = Qualification::parse_field("qualification", &q)?;
    }
    if let Some(r) = non_blank(&input.role) {
        s.role = Role::parse_field("role", &r)?;
    }
    if let Some(st) = non_blank(&input.status) {
        s.status = StaffStatus::parse_field("status", &st)?;
    }
    if let Some(raw) = &input.assigned_grade {
        s.assigned_grade_id = assigned_grade(&tx, raw)?;
    }
    if let Some(v) = non_blank(&input.phone) {
        s.phone = v;
    }
    if input.location.is_some() {
        s.location = non_blank(&input.location);
    }
    if input.email.is_some() {
        s.email = normalize_email(&input.email);
    }
    if input.medical_notes.is_some() {
        s.medical_notes = non_blank(&input.medical_notes);
    }
    if let Some(c) = &input.emergency_contact {
        s.emergency_contact = validate_contact(c)?;
    }
    if let Some(photo) = input.photo.as_deref().and_then(|p| cfg.photo_path(p)) {
        s.photo = Some(photo);
    }
    s.updated_at = now_timestamp();

    let c = &s.emergency_contact;
    tx.execute(
        "UPDATE staff SET national_id = ?, full_name = ?, gender = ?, date_of_birth = ?,
           date_of_employment = ?, qualification = ?, role = ?, assigned_grade_id = ?,
           location = ?, phone = ?, email = ?, emergency_full_name = ?,
           emergency_relationship = ?, emergency_phone = ?, emergency_location = ?,
           emergency_alternative_contact = ?, emergency_signature_date = ?, medical_notes = ?,
           photo = ?, status = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            s.national_id,
            s.full_name,
            s.gender,
            s.date_of_birth,
            s.date_of_employment,
            s.qualification,
            s.role,
            s.assigned_grade_id,
            s.location,
            s.phone,
            s.email,
            c.full_name,
            c.relationship,
            c.phone,
            c.location,
            c.alternative_contact,
            c.signature_date,
            s.medical_notes,
            s.photo,
            s.status,
            s.updated_at,
            s.id,
        ],
    )
    .map_err(|e| unique_or_db(e, DUPLICATE_NATIONAL_ID))?;
    tx.commit()?;
    Ok(s)
}

pub fn delete_staff(conn: &Connection, staff_id: &str) -> CoreResult<()> {
    let s = get_staff(conn, staff_id)?;
    conn.execute("DELETE FROM staff WHERE id = ?", [&s.id])?;
    info!(national_id = %s.national_id, "deleted staff member");
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffFilter {
    pub role: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

fn sort_column(field: &str) -> CoreResult<&'static str> {
    let column = match field {
        "fullName" => "full_name",
        "nationalId" => "national_id",
        "role" => "role",
        "status" => "status",
        "dateOfBirth" => "date_of_birth",
        "dateOfEmployment" => "date_of_employment",
        "createdAt" => "created_at",
        other => {
            return Err(CoreError::invalid(
                "sortBy",
                format!("cannot sort staff by {:?}", other),
            ));
        }
    };
    Ok(column)
}

/// Filtered staff list. `search` matches name, national ID or email; newest first unless
/// `sortBy` names a column.
pub fn list_staff(conn: &Connection, filter: &StaffFilter) -> CoreResult<Vec<Staff>> {
    let role = match non_blank(&filter.role) {
        Some(r) => Some(Role::parse_field("role", &r)?),
        None => None,
    };
    let status = match non_blank(&filter.status) {
        Some(s) => Some(StaffStatus::parse_field("status", &s)?),
        None => None,
    };
    let pattern = non_blank(&filter.search).map(|s| like_pattern(&s));
    let order = match non_blank(&filter.sort_by) {
        Some(field) => {
            let dir = match filter.sort_order.as_deref() {
                Some("desc") => "DESC",
                _ => "ASC",
            };
            format!("{} {}, rowid {}", sort_column(&field)?, dir, dir)
        }
        None => "created_at DESC, rowid DESC".to_string(),
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {STAFF_COLUMNS} FROM staff
         WHERE (?1 IS NULL OR role = ?1)
           AND (?2 IS NULL OR status = ?2)
           AND (?3 IS NULL
                OR full_name LIKE ?3 ESCAPE '\\'
                OR national_id LIKE ?3 ESCAPE '\\'
                OR email LIKE ?3 ESCAPE '\\')
         ORDER BY {order}"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![role, status, pattern], staff_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A staff member with the assigned grade name resolved and age derived.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffView {
    #[serde(flatten)]
    pub staff: Staff,
    pub assigned_grade: Option<NamedRef>,
    pub age: Option<i32>,
}

pub fn populate(conn: &Connection, staff: Staff) -> CoreResult<StaffView> {
    let assigned_grade = match &staff.assigned_grade_id {
        Some(id) => name_of(conn, "grades", id)?,
        None => None,
    };
    let age = chrono::NaiveDate::parse_from_str(&staff.date_of_birth, "%Y-%m-%d")
        .ok()
        .map(|dob| dates::age_on(dob, dates::today()));
    Ok(StaffView {
        staff,
        assigned_grade,
        age,
    })
}
