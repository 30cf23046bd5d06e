//! Booking Orchestrator - the single write path across stores.
//!
//! Wires the Availability Store, the session and payment reducers, the notification
//! dispatcher and the external payment and video collaborators together:
//! - [`BookingOrchestrator`] exposes every booking operation
//! - [`BookingStores`] bundles the repositories it writes to
//!
//! Live calls and mentor profiles are implemented in their own files on the same type.

mod live;
mod orchestrator;
mod profiles;

pub use orchestrator::{BookingOrchestrator, BookingStores};
