//! Mentorly Booking - availability and session booking engine for a mentoring marketplace
//!
//! Mentors publish time slots, mentees book them, mentors accept or decline, the mentee
//! pays and both meet in a live video call once the session is confirmed and paid.
//!
//! - **Availability Store**: non-overlapping open slots per mentor, atomic reservation
//! - **Session State Machine**: `requested → confirmed | declined`,
//!   `confirmed → completed | cancelled`, nothing leaves a terminal status
//! - **Payment Gate**: live-session entry requires a confirmed, paid session inside
//!   its scheduled window
//! - **Notification Dispatcher**: in-app notifications after every transition, never
//!   blocking the transition itself
//! - **Booking Orchestrator**: the single write path tying it all together
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────────┐
//!   request/respond →  │ BookingOrchestrator  │
//!                      └──────────────────────┘
//!              │ reduce            │ commit (conditional writes)
//!              ▼                   ▼
//!  ┌─────────────────────┐   ┌─────────────────────────────┐
//!  │ SessionReducer      │   │ Slot / Session /            │
//!  │ PaymentReducer      │   │ Notification repositories   │
//!  └─────────────────────┘   └─────────────────────────────┘
//!              │ effects (after commit)
//!              ▼
//!  ┌─────────────────────┐
//!  │ NotificationDispatcher │
//!  └─────────────────────┘
//! ```
//!
//! Every invariant that must survive concurrent requests (one booking per slot, one
//! transition out of a status, one payment per session) is enforced by a single
//! conditional write at the repository, not by a read-then-write in the caller.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod app;
pub mod availability;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notifications;
pub mod payment_gateway;
pub mod stores;
pub mod types;
pub mod video;

pub use aggregates::payment::{PaymentAction, PaymentReducer, can_join_live_session};
pub use aggregates::session::{SessionAction, SessionReducer};
pub use aggregates::{SessionEvent, SessionState};
pub use app::{BookingOrchestrator, BookingStores};
pub use availability::AvailabilityStore;
pub use config::Config;
pub use error::{BookingError, ErrorCategory, ErrorResponse, Result, StoreError};
pub use types::*;
