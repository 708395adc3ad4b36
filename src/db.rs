use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates every table and index if missing.
///
/// `attendance_records.student_id` carries no foreign key: marked history outlives the student.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            sort_order INTEGER NOT NULL UNIQUE,
            description TEXT,
            teacher_id TEXT,
            max_capacity_per_class INTEGER NOT NULL DEFAULT 29,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            name TEXT NOT NULL,
            suffix TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            current_count INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            UNIQUE(grade_id, suffix)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_grade ON classrooms(grade_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            admission_no TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            photo TEXT,
            grade_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            parent_full_name TEXT NOT NULL,
            parent_relationship TEXT NOT NULL,
            parent_phone TEXT NOT NULL,
            parent_location TEXT,
            parent_email TEXT,
            parent_alternative_contact TEXT,
            initial_fee_amount REAL NOT NULL,
            initial_fee_billing_type TEXT NOT NULL,
            admission_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            registered_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade ON students(grade_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            receipt_no TEXT UNIQUE,
            amount REAL NOT NULL CHECK(amount >= 0),
            billing_type TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'outstanding',
            due_date TEXT,
            paid_date TEXT,
            paid_amount REAL NOT NULL DEFAULT 0,
            payment_method TEXT,
            recorded_by TEXT,
            paid_recorded_by TEXT,
            term TEXT,
            year INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_student ON fees(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_status_year ON fees(status, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            marked_by TEXT NOT NULL,
            last_edited_by TEXT,
            last_edited_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(date, classroom_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            attendance_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(attendance_id, student_id),
            FOREIGN KEY(attendance_id) REFERENCES attendance(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_student
            ON attendance_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_by TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            UNIQUE(grade_id, day_of_week)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_periods(
            schedule_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            activity TEXT NOT NULL,
            period_type TEXT NOT NULL,
            PRIMARY KEY(schedule_id, idx),
            FOREIGN KEY(schedule_id) REFERENCES schedules(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            national_id TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            gender TEXT,
            date_of_birth TEXT NOT NULL,
            date_of_employment TEXT NOT NULL,
            qualification TEXT NOT NULL,
            role TEXT NOT NULL,
            assigned_grade_id TEXT,
            location TEXT,
            phone TEXT NOT NULL,
            email TEXT,
            emergency_full_name TEXT NOT NULL,
            emergency_relationship TEXT NOT NULL,
            emergency_phone TEXT NOT NULL,
            emergency_location TEXT,
            emergency_alternative_contact TEXT,
            emergency_signature_date TEXT NOT NULL,
            medical_notes TEXT,
            photo TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            registered_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(assigned_grade_id) REFERENCES grades(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_role_status ON staff(role, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sequences(
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}
