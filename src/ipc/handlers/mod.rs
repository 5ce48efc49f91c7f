pub mod academic_years;
pub mod applications;
pub mod auth;
pub mod backup;
pub mod complaints;
pub mod core;
pub mod crud;
pub mod dashboard;
pub mod duties;
pub mod evaluations;
pub mod events;
pub mod gate_logs;
pub mod incidents;
pub mod profiles;
pub mod training;
pub mod users;
pub mod weekly_reports;
