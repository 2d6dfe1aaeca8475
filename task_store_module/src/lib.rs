//! Client for the task-tracking backend.
//!
//! The backend owns task records: one task per email thread, carrying the
//! creator, assignee, criticality, status and the rendered email body.
//! [`TaskStore`] is the seam the scheduler talks to; [`HttpTaskStore`] is the
//! production implementation over the backend's REST API.

mod client;
mod errors;
mod session;
mod timestamps;
mod types;

pub use client::{HttpTaskStore, TaskFilter, TaskStore};
pub use errors::BackendError;
pub use session::{BackendCredentials, BackendSession};
pub use timestamps::parse_backend_timestamp;
pub use types::{Criticality, NewTask, Task, TaskStatus};
