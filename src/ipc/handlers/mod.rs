pub mod analytics;
pub mod backup;
pub mod classes;
pub mod core;
pub mod lectures;
pub mod setup;
pub mod subjects;
pub mod syllabus;
pub mod teachers;
pub mod timetables;
