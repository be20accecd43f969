//! The command facade: every operation the UI bridge exposes, organized by
//! functional domain.
//!
//! - `rules`: firewall rule CRUD and domain blocking
//! - `segments`: departments, devices, connection policies
//! - `ids`: IDS engine lifecycle
//! - `events`: extraction, alert pages, flow reports
//! - `system`: notification settings and subscriptions
//! - `logic`: pure validation functions (unit-testable)
//! - `state`: shared `AppState` definition

mod logic;
mod state;

pub mod events;
pub mod ids;
pub mod rules;
pub mod segments;
pub mod system;

pub use state::AppState;

#[cfg(test)]
pub(crate) use state::tests;
