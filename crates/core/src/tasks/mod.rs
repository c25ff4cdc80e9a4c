//! Maintenance task models.

mod tasks_model;

pub use tasks_model::*;
