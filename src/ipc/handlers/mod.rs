pub mod audit;
pub mod classes;
pub mod core;
pub mod exchange;
pub mod reports;
pub mod schedule;
pub mod subjects;
pub mod teachers;
pub mod years;
