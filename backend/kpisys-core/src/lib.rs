// src/lib.rs
pub mod clock;
pub mod codes;
pub mod config;
pub mod employee;
pub mod error;
pub mod import;
pub mod kpi;
pub mod organization;
pub mod project;
pub mod seed;
pub mod session;
pub mod store;
pub mod task;
pub mod timesheet;
pub mod users;
pub mod web;

pub use clock::Clock;
pub use config::Config;
pub use store::Store;

#[cfg(test)]
mod timesheet_tests;
#[cfg(test)]
mod web_tests;
