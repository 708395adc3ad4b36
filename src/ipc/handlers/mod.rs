pub mod attendance;
pub mod classrooms;
pub mod core;
pub mod fees;
pub mod grades;
pub mod schedules;
pub mod staff;
pub mod students;
