//! Trial-lesson booking dialogue.
//!
//! A user in a booking walks through five steps (course, time slot, name,
//! email, phone) and then confirms. [`machine`] holds the pure transition
//! logic, [`manager`] owns the live sessions and their timeouts, and
//! [`prompts`] renders each step for the user.

pub mod catalog;
pub mod machine;
pub mod manager;
pub mod prompts;
pub mod state;

pub use catalog::{Catalog, CatalogEntry};
pub use machine::{BookingRecord, CollectedField, Session, Transition, is_cancel, transition};
pub use manager::{BookingManager, BookingOutcome, spawn_sweep_task};
pub use state::BookingState;
