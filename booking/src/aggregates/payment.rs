//! Payment Gate.
//!
//! Tracks the payment status of a session and decides access to the live session. The
//! reducer only records facts about money that already moved at the processor; charging
//! and refunding happen in the orchestrator around it.

use super::{SessionEvent, SessionState};
use crate::error::BookingError;
use crate::types::{
    AccessDenial, Money, Payment, PaymentId, PaymentMethod, PaymentStatus, Session, SessionId,
    SessionStatus, UserId,
};
use chrono::{DateTime, Utc};
use mentorly_core::{effect::Effect, environment::Clock, reducer::Reducer, SmallVec};
use std::sync::Arc;

/// Commands understood by [`PaymentReducer`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentAction {
    /// Record a successful charge
    Complete {
        /// Session paid for
        session_id: SessionId,
        /// Who paid
        payer_id: UserId,
        /// Payment record id
        payment_id: PaymentId,
        /// Amount charged
        amount: Money,
        /// Method used
        method: PaymentMethod,
        /// Processor reference
        transaction_ref: String,
    },
    /// Record a refund
    Refund {
        /// Session
        session_id: SessionId,
    },
}

/// Dependencies of [`PaymentReducer`]
#[derive(Clone)]
pub struct PaymentEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
}

impl PaymentEnvironment {
    /// Creates a new payment environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Reducer for session payments
#[derive(Clone, Debug, Default)]
pub struct PaymentReducer;

impl PaymentReducer {
    /// Creates a new payment reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Reset payment tracking for a freshly created session.
pub fn mark_pending(session: &mut Session) {
    session.payment_status = PaymentStatus::Pending;
    session.payment_ref = None;
}

/// Check that `payer_id` may pay `amount` for `session` now.
///
/// # Errors
///
/// - [`BookingError::Unauthorized`]: payer is not the mentee
/// - [`BookingError::Validation`]: zero amount
/// - [`BookingError::InvalidState`]: session not payable or already paid
pub fn validate_complete(session: &Session, payer_id: UserId, amount: Money) -> Result<(), BookingError> {
    if payer_id != session.mentee_id {
        return Err(BookingError::Unauthorized {
            actor_id: payer_id,
            action: "pay for this session",
        });
    }
    if amount.is_zero() {
        return Err(BookingError::Validation(
            "payment amount must be greater than zero".to_string(),
        ));
    }
    if !matches!(session.status, SessionStatus::Requested | SessionStatus::Confirmed) {
        return Err(BookingError::InvalidState {
            session_id: session.id,
            reason: format!("a {} session cannot be paid", session.status),
        });
    }
    if session.payment_status != PaymentStatus::Pending {
        return Err(BookingError::InvalidState {
            session_id: session.id,
            reason: format!("payment is already {}", session.payment_status),
        });
    }
    Ok(())
}

/// Check that the session's payment can be refunded.
///
/// # Errors
///
/// Returns [`BookingError::InvalidState`] unless the payment is completed.
pub fn validate_refund(session: &Session) -> Result<(), BookingError> {
    if session.payment_status != PaymentStatus::Completed {
        return Err(BookingError::InvalidState {
            session_id: session.id,
            reason: format!("payment is {}, nothing to refund", session.payment_status),
        });
    }
    Ok(())
}

/// Why access to the live session is refused at `now`, if it is.
///
/// # Errors
///
/// Returns the first failing condition: status, then payment, then time window.
pub fn check_live_access(session: &Session, now: DateTime<Utc>) -> Result<(), AccessDenial> {
    if session.status != SessionStatus::Confirmed {
        return Err(AccessDenial::NotConfirmed(session.status));
    }
    if session.payment_status != PaymentStatus::Completed {
        return Err(AccessDenial::PaymentIncomplete(session.payment_status));
    }
    if !session.range.contains(now) {
        return Err(AccessDenial::OutsideWindow);
    }
    Ok(())
}

/// Confirmed, paid and `start <= now <= end`.
#[must_use]
pub fn can_join_live_session(session: &Session, now: DateTime<Utc>) -> bool {
    check_live_access(session, now).is_ok()
}

fn loaded(state: &SessionState, session_id: SessionId) -> Result<&Session, BookingError> {
    state
        .session
        .as_ref()
        .filter(|s| s.id == session_id)
        .ok_or_else(|| BookingError::not_found("session", session_id))
}

impl Reducer for PaymentReducer {
    type State = SessionState;
    type Action = PaymentAction;
    type Environment = PaymentEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        state.last_error = None;

        match action {
            PaymentAction::Complete {
                session_id,
                payer_id,
                payment_id,
                amount,
                method,
                transaction_ref,
            } => {
                let valid = loaded(state, session_id)
                    .and_then(|session| validate_complete(session, payer_id, amount));
                if let Err(e) = valid {
                    state.reject(e);
                    return SmallVec::new();
                }

                let at = env.clock.now();
                state.emit(SessionEvent::PaymentCompleted {
                    payment: Payment {
                        id: payment_id,
                        session_id,
                        amount,
                        method,
                        status: PaymentStatus::Completed,
                        transaction_ref,
                        processed_at: at,
                    },
                    at,
                });
            },

            PaymentAction::Refund { session_id } => {
                let refundable = loaded(state, session_id)
                    .and_then(|session| validate_refund(session).map(|()| session.payment_ref));
                let payment_id = match refundable {
                    Ok(payment_id) => payment_id,
                    Err(e) => {
                        state.reject(e);
                        return SmallVec::new();
                    },
                };

                state.emit(SessionEvent::PaymentRefunded {
                    session_id,
                    payment_id,
                    at: env.clock.now(),
                });
            },
        }

        SmallVec::new()
    }
}
