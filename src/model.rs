use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Closed string unions stored as TEXT columns and exchanged as snake_case JSON strings.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Parses a request field, naming the field and the accepted values on failure.
            pub fn parse_field(field: &str, s: &str) -> CoreResult<Self> {
                Self::parse(s).ok_or_else(|| {
                    let allowed: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
                    CoreError::invalid(
                        field,
                        format!("{} must be one of {}, got {:?}", field, allowed.join("|"), s),
                    )
                })
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let s = value.as_str()?;
                $name::parse(s).ok_or_else(|| {
                    rusqlite::types::FromSqlError::Other(
                        format!("unknown {} value: {}", stringify!($name), s).into(),
                    )
                })
            }
        }
    };
}

text_enum!(StudentStatus {
    Active => "active",
    Inactive => "inactive",
    Graduated => "graduated",
    Transferred => "transferred",
});

text_enum!(Gender {
    Male => "male",
    Female => "female",
});

text_enum!(Relationship {
    Father => "father",
    Mother => "mother",
    Guardian => "guardian",
    Other => "other",
});

text_enum!(AttendanceStatus {
    Present => "present",
    Absent => "absent",
    Late => "late",
});

text_enum!(FeeStatus {
    Outstanding => "outstanding",
    Paid => "paid",
});

text_enum!(BillingType {
    Term => "term",
    Monthly => "monthly",
    Annual => "annual",
    Once => "once",
});

text_enum!(PaymentMethod {
    Cash => "cash",
    BankTransfer => "bank_transfer",
    MobileMoney => "mobile_money",
    Cheque => "cheque",
});

text_enum!(SchoolDay {
    Monday => "monday",
    Tuesday => "tuesday",
    Wednesday => "wednesday",
    Thursday => "thursday",
    Friday => "friday",
});

text_enum!(PeriodType {
    Activity => "activity",
    Class => "class",
    Break => "break",
    Lunch => "lunch",
    Nap => "nap",
});

text_enum!(
    /// Staff roles, both on staff records and on the acting user.
    Role {
        Admin => "admin",
        HeadTeacher => "head_teacher",
        Teacher => "teacher",
        SupportStaff => "support_staff",
    }
);

text_enum!(Qualification {
    Certificate => "certificate",
    Diploma => "diploma",
    Bachelors => "bachelors",
    Masters => "masters",
    Phd => "phd",
});

text_enum!(StaffStatus {
    Active => "active",
    Inactive => "inactive",
    OnLeave => "on_leave",
    Terminated => "terminated",
});

impl Role {
    /// Like `parse`, but accepts the retired `super_admin` role as `admin`.
    pub fn parse_with_legacy(s: &str) -> Option<Self> {
        match s.trim() {
            "super_admin" => Some(Role::Admin),
            other => Role::parse(other),
        }
    }
}

impl SchoolDay {
    pub fn from_weekday(day: chrono::Weekday) -> Option<Self> {
        match day {
            chrono::Weekday::Mon => Some(Self::Monday),
            chrono::Weekday::Tue => Some(Self::Tuesday),
            chrono::Weekday::Wed => Some(Self::Wednesday),
            chrono::Weekday::Thu => Some(Self::Thursday),
            chrono::Weekday::Fri => Some(Self::Friday),
            chrono::Weekday::Sat | chrono::Weekday::Sun => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub name: String,
    pub order: i64,
    pub description: Option<String>,
    pub teacher_id: Option<String>,
    pub max_capacity_per_class: i64,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub grade_id: String,
    pub name: String,
    pub suffix: String,
    pub capacity: i64,
    pub current_count: i64,
    pub is_active: bool,
}

impl Classroom {
    pub fn is_full(&self) -> bool {
        self.current_count >= self.capacity
    }

    pub fn available_spots(&self) -> i64 {
        self.capacity - self.current_count
    }

    pub fn view(&self) -> ClassroomView<'_> {
        ClassroomView {
            classroom: self,
            is_full: self.is_full(),
            available_spots: self.available_spots(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomView<'a> {
    #[serde(flatten)]
    pub classroom: &'a Classroom,
    pub is_full: bool,
    pub available_spots: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub full_name: String,
    pub relationship: Relationship,
    pub phone: String,
    pub location: Option<String>,
    pub email: Option<String>,
    pub alternative_contact: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialFee {
    pub amount: f64,
    pub billing_type: BillingType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub admission_no: String,
    pub full_name: String,
    pub gender: Gender,
    pub date_of_birth: String,
    pub photo: Option<String>,
    pub grade_id: String,
    pub classroom_id: String,
    pub parent: Parent,
    pub initial_fee: InitialFee,
    pub admission_date: String,
    pub status: StudentStatus,
    pub registered_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Who to call for a staff member. `relationship` is free text, unlike a student's parent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    pub full_name: String,
    pub relationship: String,
    pub phone: String,
    pub location: Option<String>,
    pub alternative_contact: Option<String>,
    pub signature_date: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    pub id: String,
    pub national_id: String,
    pub full_name: String,
    pub gender: Option<Gender>,
    pub date_of_birth: String,
    pub date_of_employment: String,
    pub qualification: Qualification,
    pub role: Role,
    pub assigned_grade_id: Option<String>,
    pub location: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub emergency_contact: EmergencyContact,
    pub medical_notes: Option<String>,
    pub photo: Option<String>,
    pub status: StaffStatus,
    pub registered_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fee {
    pub id: String,
    pub student_id: String,
    pub receipt_no: Option<String>,
    pub amount: f64,
    pub billing_type: BillingType,
    pub description: Option<String>,
    pub status: FeeStatus,
    pub due_date: Option<String>,
    pub paid_date: Option<String>,
    pub paid_amount: f64,
    pub payment_method: Option<PaymentMethod>,
    pub recorded_by: Option<String>,
    pub paid_recorded_by: Option<String>,
    pub term: Option<String>,
    pub year: i32,
    pub created_at: String,
}

impl Fee {
    pub fn balance(&self) -> f64 {
        self.amount - self.paid_amount
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceStats {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub total: usize,
}

impl AttendanceStats {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a AttendanceStatus>) -> Self {
        let mut stats = Self::default();
        for status in statuses {
            match status {
                AttendanceStatus::Present => stats.present += 1,
                AttendanceStatus::Absent => stats.absent += 1,
                AttendanceStatus::Late => stats.late += 1,
            }
            stats.total += 1;
        }
        stats
    }

    pub fn add(&mut self, other: AttendanceStats) {
        self.present += other.present;
        self.absent += other.absent;
        self.late += other.late;
        self.total += other.total;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id: String,
    pub date: String,
    pub grade_id: String,
    pub classroom_id: String,
    pub records: Vec<AttendanceRecord>,
    pub marked_by: String,
    pub last_edited_by: Option<String>,
    pub last_edited_at: Option<String>,
    pub created_at: String,
}

impl Attendance {
    /// Always recomputed from `records`; never persisted.
    pub fn stats(&self) -> AttendanceStats {
        AttendanceStats::tally(self.records.iter().map(|r| &r.status))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start_time: String,
    pub end_time: String,
    pub activity: String,
    #[serde(rename = "type")]
    pub kind: PeriodType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub grade_id: String,
    pub day_of_week: SchoolDay,
    pub periods: Vec<Period>,
    pub is_active: bool,
    pub created_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_are_tallied_from_records() {
        let statuses = [
            AttendanceStatus::Present,
            AttendanceStatus::Late,
            AttendanceStatus::Late,
        ];
        let stats = AttendanceStats::tally(statuses.iter());
        assert_eq!(
            stats,
            AttendanceStats {
                present: 1,
                absent: 0,
                late: 2,
                total: 3
            }
        );
    }

    #[test]
    fn legacy_super_admin_maps_to_admin() {
        assert_eq!(Role::parse_with_legacy("super_admin"), Some(Role::Admin));
        assert_eq!(Role::parse("super_admin"), None);
        assert_eq!(Role::parse_with_legacy("teacher"), Some(Role::Teacher));
    }

    #[test]
    fn status_strings_are_closed() {
        assert_eq!(AttendanceStatus::parse("late"), Some(AttendanceStatus::Late));
        assert_eq!(AttendanceStatus::parse("excused"), None);
        assert_eq!(PaymentMethod::parse("mobile_money"), Some(PaymentMethod::MobileMoney));
        assert_eq!(BillingType::ALL.len(), 4);
    }

    #[test]
    fn padded_values_are_not_accepted() {
        assert_eq!(AttendanceStatus::parse(" late "), None);
        assert_eq!(AttendanceStatus::parse("Late"), None);
        assert!(AttendanceStatus::parse_field("records[0].status", " late ").is_err());
        assert_eq!(Role::parse_with_legacy(" teacher "), Some(Role::Teacher));
    }
}
