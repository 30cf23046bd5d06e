//! Session aggregate: the state both session reducers operate on.
//!
//! A reducer validates a command against the loaded [`Session`], applies the resulting
//! [`SessionEvent`] to the state and queues it as uncommitted. The orchestrator turns
//! every uncommitted event into one conditional repository write before it runs any
//! effect.

pub mod payment;
pub mod session;

use crate::error::BookingError;
use crate::types::{
    NotificationId, NotificationKind, Payment, PaymentId, PaymentStatus, Session, SessionId,
    SessionStatus, SessionTrigger, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Facts produced by the session and payment reducers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A booking request created the session
    Requested {
        /// The new session
        session: Session,
    },
    /// The session moved along the transition table
    StatusChanged {
        /// Session
        session_id: SessionId,
        /// Status the command was validated against
        from: SessionStatus,
        /// New status
        to: SessionStatus,
        /// What caused it
        trigger: SessionTrigger,
        /// When
        at: DateTime<Utc>,
    },
    /// Notes replaced
    NotesUpdated {
        /// Session
        session_id: SessionId,
        /// New notes (`None` clears them)
        notes: Option<String>,
        /// When
        at: DateTime<Utc>,
    },
    /// Transcript stored
    TranscriptRecorded {
        /// Session
        session_id: SessionId,
        /// Transcript text
        transcript: String,
        /// When
        at: DateTime<Utc>,
    },
    /// Video room attached to the session
    VideoCallLinked {
        /// Session
        session_id: SessionId,
        /// Room reference
        call_ref: String,
        /// When
        at: DateTime<Utc>,
    },
    /// Payment went through
    PaymentCompleted {
        /// Payment record to persist
        payment: Payment,
        /// When
        at: DateTime<Utc>,
    },
    /// Payment returned to the mentee
    PaymentRefunded {
        /// Session
        session_id: SessionId,
        /// Refunded payment record
        payment_id: Option<PaymentId>,
        /// When
        at: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Session the event belongs to
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        match self {
            Self::Requested { session } => session.id,
            Self::PaymentCompleted { payment, .. } => payment.session_id,
            Self::StatusChanged { session_id, .. }
            | Self::NotesUpdated { session_id, .. }
            | Self::TranscriptRecorded { session_id, .. }
            | Self::VideoCallLinked { session_id, .. }
            | Self::PaymentRefunded { session_id, .. } => *session_id,
        }
    }
}

/// Outcome of one notification effect, fed back into the reducer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Stored for the recipient
    Delivered(NotificationId),
    /// Dropped after logging
    Failed(String),
}

/// State of one session while a command is processed.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    /// Loaded (or newly requested) session
    pub session: Option<Session>,
    /// Last validation error; cleared by the next command
    pub last_error: Option<BookingError>,
    /// Notification outcomes reported back by effects
    pub deliveries: Vec<(UserId, NotificationKind, DeliveryOutcome)>,
    uncommitted: Vec<SessionEvent>,
}

impl SessionState {
    /// State with no session yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a session read from the repository
    #[must_use]
    pub fn loaded(session: Session) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }

    /// Current status, if a session is loaded
    #[must_use]
    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    /// Current payment status, if a session is loaded
    #[must_use]
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.session.as_ref().map(|s| s.payment_status)
    }

    /// Events applied to the state but not yet written
    #[must_use]
    pub fn uncommitted(&self) -> &[SessionEvent] {
        &self.uncommitted
    }

    /// Drain the uncommitted events for writing
    pub fn take_uncommitted(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.uncommitted)
    }

    /// Number of notifications that were stored
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|(_, _, outcome)| matches!(outcome, DeliveryOutcome::Delivered(_)))
            .count()
    }

    pub(crate) fn reject(&mut self, error: BookingError) {
        self.last_error = Some(error);
    }

    pub(crate) fn emit(&mut self, event: SessionEvent) {
        self.apply_event(&event);
        self.uncommitted.push(event);
    }

    /// Apply an event to the in-memory session.
    pub fn apply_event(&mut self, event: &SessionEvent) {
        if let SessionEvent::Requested { session } = event {
            self.session = Some(session.clone());
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match event {
            SessionEvent::Requested { .. } => {},
            SessionEvent::StatusChanged { to, at, .. } => {
                session.status = *to;
                session.updated_at = *at;
            },
            SessionEvent::NotesUpdated { notes, at, .. } => {
                session.notes.clone_from(notes);
                session.updated_at = *at;
            },
            SessionEvent::TranscriptRecorded { transcript, at, .. } => {
                session.transcript = Some(transcript.clone());
                session.updated_at = *at;
            },
            SessionEvent::VideoCallLinked { call_ref, at, .. } => {
                session.video_call_ref = Some(call_ref.clone());
                session.updated_at = *at;
            },
            SessionEvent::PaymentCompleted { payment, at } => {
                session.payment_status = PaymentStatus::Completed;
                session.payment_ref = Some(payment.id);
                session.updated_at = *at;
            },
            SessionEvent::PaymentRefunded { at, .. } => {
                session.payment_status = PaymentStatus::Refunded;
                session.updated_at = *at;
            },
        }
    }
}
