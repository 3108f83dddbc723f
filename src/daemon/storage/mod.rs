//! Storage is organized through [event_storage::EventStorage].
//! The basic idea is:
//!  - There is a directory with all the records.
//!  - Records are stored using record files, which store the events of a UTC day.
//!  - Every line of a record file is a single json encoded event.

pub mod entities;
pub mod event_storage;
#[cfg(test)]
pub mod memory;
pub mod sink;
