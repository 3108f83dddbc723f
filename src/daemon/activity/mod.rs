//! Turns foreground window samples and input signals into [ActivityEvent]s.
//!
//! [ActivityEvent]: crate::daemon::storage::entities::ActivityEvent

pub mod idle;
pub mod state;
pub mod tracker;
