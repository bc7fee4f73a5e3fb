//! Academic result aggregation: per-semester GPA, running CGPA and YGPA,
//! improvement-sitting reconciliation, what-if recomputation, cohort ranking
//! and course-level summaries over a catalog of published result tables.

pub mod aggregate;
pub mod cohort;
pub mod config;
pub mod course;
pub mod db;
pub mod error;
pub mod grades;
pub mod models;
pub mod report;
pub mod service;
pub mod store;
pub mod whatif;
