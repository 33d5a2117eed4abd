pub mod approvals;
pub mod core;
pub mod directory;
pub mod instances;
pub mod setup;
pub mod slots;
pub mod timetable;
