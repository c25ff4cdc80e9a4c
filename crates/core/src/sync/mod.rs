//! Change-feed events and the reconciled task list.

mod change_event_model;
mod task_view_model;

pub use change_event_model::*;
pub use task_view_model::*;
