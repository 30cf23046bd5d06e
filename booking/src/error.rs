//! Error taxonomy for the booking engine.
//!
//! [`BookingError`] is what every public operation returns. Each variant carries a stable
//! code for the UI and falls into one [`ErrorCategory`]. [`StoreError`] is the narrower
//! error produced at the persistence boundary and converted on the way up.

use crate::types::{AccessDenial, SessionId, SessionStatus, SessionTrigger, SlotId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Result type for booking operations
pub type Result<T> = std::result::Result<T, BookingError>;

/// Errors returned by booking operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// `start >= end`
    #[error("Invalid time range: start {start} must be before end {end}")]
    InvalidRange {
        /// Requested start
        start: DateTime<Utc>,
        /// Requested end
        end: DateTime<Utc>,
    },

    /// Input is malformed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The new slot intersects an open slot of the same mentor
    #[error("Slot [{start}, {end}) overlaps an open slot of mentor {mentor_id}")]
    Overlap {
        /// Mentor publishing the slot
        mentor_id: UserId,
        /// Requested start
        start: DateTime<Utc>,
        /// Requested end
        end: DateTime<Utc>,
    },

    /// Another booking reserved the slot first
    #[error("Slot {0} is already booked")]
    AlreadyBooked(SlotId),

    /// A booked slot cannot be released
    #[error("Slot {0} is booked and cannot be released")]
    SlotInUse(SlotId),

    /// The session is not in a status that allows the trigger
    #[error("Session {session_id} cannot {trigger} while {from}")]
    IllegalTransition {
        /// Session
        session_id: SessionId,
        /// Status observed when the transition was attempted
        from: SessionStatus,
        /// Attempted transition
        trigger: SessionTrigger,
    },

    /// A non-transition operation is not allowed in the session's current state
    #[error("Session {session_id}: {reason}")]
    InvalidState {
        /// Session
        session_id: SessionId,
        /// What is wrong
        reason: String,
    },

    /// A conditional write found the record changed since it was read
    #[error("{entity} {id} was modified concurrently")]
    StaleState {
        /// Entity kind
        entity: &'static str,
        /// Entity id
        id: String,
    },

    /// Actor is not allowed to perform the operation
    #[error("User {actor_id} is not permitted to {action}")]
    Unauthorized {
        /// Who tried
        actor_id: UserId,
        /// What they tried
        action: &'static str,
    },

    /// The live-session access gate refused entry
    #[error("Live session {session_id} is not available: {reason}")]
    LiveSessionUnavailable {
        /// Session
        session_id: SessionId,
        /// Why access was refused
        reason: AccessDenial,
    },

    /// Entity does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Entity id
        id: String,
    },

    /// Payment processor rejected or failed an operation
    #[error("Payment failed: {0}")]
    Payment(String),

    /// A notification could not be delivered
    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),

    /// The video provider failed
    #[error("Video provider error: {0}")]
    Video(String),

    /// An external call exceeded its time budget
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Budget in milliseconds
        timeout_ms: u64,
    },

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coarse error classes consumed by callers to pick a presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad input shape or range
    Validation,
    /// Lost an optimistic-concurrency race or hit an illegal state
    Conflict,
    /// Actor not permitted
    Authorization,
    /// Missing entity
    NotFound,
    /// Payment processing failed
    Payment,
    /// Notification delivery failed (never fatal)
    NotificationDelivery,
    /// Infrastructure failure
    Internal,
}

/// Serializable error body with no internal details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Stable error code
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
}

impl BookingError {
    /// Create a `NotFound` error
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "INVALID_RANGE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Overlap { .. } => "SLOT_OVERLAP",
            Self::AlreadyBooked(_) => "ALREADY_BOOKED",
            Self::SlotInUse(_) => "SLOT_IN_USE",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::StaleState { .. } => "STALE_STATE",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::LiveSessionUnavailable { .. } => "LIVE_SESSION_UNAVAILABLE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Payment(_) => "PAYMENT_ERROR",
            Self::NotificationDelivery(_) => "NOTIFICATION_DELIVERY_ERROR",
            Self::Video(_) => "VIDEO_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Storage(_) => "INTERNAL_ERROR",
        }
    }

    /// Error class of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRange { .. } | Self::Validation(_) | Self::Overlap { .. } => {
                ErrorCategory::Validation
            },
            Self::AlreadyBooked(_)
            | Self::SlotInUse(_)
            | Self::IllegalTransition { .. }
            | Self::InvalidState { .. }
            | Self::StaleState { .. }
            | Self::LiveSessionUnavailable { .. } => ErrorCategory::Conflict,
            Self::Unauthorized { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Payment(_) => ErrorCategory::Payment,
            Self::NotificationDelivery(_) => ErrorCategory::NotificationDelivery,
            Self::Video(_) | Self::Timeout { .. } | Self::Storage(_) => ErrorCategory::Internal,
        }
    }

    /// Body suitable for a client. Infrastructure details are replaced by a generic text.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            Self::Storage(_) => "An internal error occurred".to_string(),
            Self::Timeout { .. } => "An upstream service did not respond in time".to_string(),
            Self::Video(_) => "The video service is unavailable".to_string(),
            Self::Payment(_) => "The payment could not be processed".to_string(),
            Self::NotificationDelivery(_) => "The notification could not be delivered".to_string(),
            other => other.to_string(),
        };
        ErrorResponse {
            code: self.code(),
            message,
        }
    }
}

/// Errors at the persistence boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Row does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Entity id
        id: String,
    },

    /// Insert would overlap an open slot
    #[error("Slot overlaps an open slot of mentor {mentor_id}")]
    Overlap {
        /// Mentor
        mentor_id: UserId,
        /// Requested start
        start: DateTime<Utc>,
        /// Requested end
        end: DateTime<Utc>,
    },

    /// Reservation lost: slot already booked
    #[error("Slot {0} is already booked")]
    AlreadyBooked(SlotId),

    /// Delete refused: slot is booked
    #[error("Slot {0} is in use")]
    SlotInUse(SlotId),

    /// Conditional update matched no row
    #[error("{entity} {id} changed since it was read")]
    Stale {
        /// Entity kind
        entity: &'static str,
        /// Entity id
        id: String,
    },

    /// Driver or connection failure
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Create a `NotFound` error
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a `Stale` error
    #[must_use]
    pub fn stale(entity: &'static str, id: impl ToString) -> Self {
        Self::Stale {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Overlap {
                mentor_id,
                start,
                end,
            } => Self::Overlap {
                mentor_id,
                start,
                end,
            },
            StoreError::AlreadyBooked(slot_id) => Self::AlreadyBooked(slot_id),
            StoreError::SlotInUse(slot_id) => Self::SlotInUse(slot_id),
            StoreError::Stale { entity, id } => Self::StaleState { entity, id },
            StoreError::Database(message) => Self::Storage(message),
        }
    }
}
