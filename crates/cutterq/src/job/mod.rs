//! The cutting job model.
//!
//! A [`CutterJob`] references one cut-ready plot file together with the
//! scheduling, timing and integrity metadata the queue and archive need.

pub mod model;
pub mod types;

pub use model::{CutterJob, Measurements, NewJob};
pub use types::{JobId, JobPriority, JobStatus, ParseEnumError};
