//! Session State Machine.
//!
//! ```text
//! requested --accept-->   confirmed --complete--> completed
//!     |                       |
//!     +------decline--> declined   +--cancel--> cancelled
//! ```
//!
//! Every committed transition produces exactly one notification effect per recipient of
//! its notification kind. Notification failures come back as feedback and are only
//! recorded; they never undo the transition.

use super::{DeliveryOutcome, SessionEvent, SessionState};
use crate::aggregates::payment;
use crate::error::BookingError;
use crate::metrics;
use crate::notifications::{NotificationDispatcher, NotificationRequest, TemplateParams};
use crate::types::{
    AvailabilitySlot, Decision, NotificationId, NotificationKind, PaymentStatus, Session,
    SessionId, SessionStatus, SessionTrigger, UserId,
};
use mentorly_core::{effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec};
use std::sync::Arc;

/// Commands and effect feedback understood by [`SessionReducer`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// Create a session from a reserved slot
    Request {
        /// Identifier for the new session
        session_id: SessionId,
        /// The slot, already reserved
        slot: AvailabilitySlot,
        /// Who is booking
        mentee_id: UserId,
    },
    /// Mentor accepts or declines a request
    Respond {
        /// Session
        session_id: SessionId,
        /// Acting user
        actor_id: UserId,
        /// Accept or decline
        decision: Decision,
    },
    /// A participant cancels a confirmed session
    Cancel {
        /// Session
        session_id: SessionId,
        /// Acting user
        actor_id: UserId,
    },
    /// The session took place
    Complete {
        /// Session
        session_id: SessionId,
    },
    /// Replace the notes
    UpdateNotes {
        /// Session
        session_id: SessionId,
        /// Acting user
        actor_id: UserId,
        /// New notes
        notes: Option<String>,
    },
    /// Store the call transcript
    RecordTranscript {
        /// Session
        session_id: SessionId,
        /// Acting user
        actor_id: UserId,
        /// Transcript text
        transcript: String,
    },
    /// Attach the video room
    LinkVideoCall {
        /// Session
        session_id: SessionId,
        /// Room reference
        call_ref: String,
    },
    /// Remind both participants of a confirmed session
    SendReminder {
        /// Session
        session_id: SessionId,
    },
    /// Feedback: a notification was stored
    NotificationSent {
        /// Recipient
        user_id: UserId,
        /// Notification type
        kind: NotificationKind,
        /// Stored notification
        notification_id: NotificationId,
    },
    /// Feedback: a notification could not be delivered
    NotificationFailed {
        /// Recipient
        user_id: UserId,
        /// Notification type
        kind: NotificationKind,
        /// Failure description
        error: String,
    },
}

/// Dependencies of [`SessionReducer`]
#[derive(Clone)]
pub struct SessionEnvironment {
    /// Time source for every timestamp
    pub clock: Arc<dyn Clock>,
    /// Notification delivery
    pub notifier: Arc<dyn NotificationDispatcher>,
}

impl SessionEnvironment {
    /// Creates a new environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self { clock, notifier }
    }
}

/// Reducer for the session lifecycle
#[derive(Clone, Debug, Default)]
pub struct SessionReducer;

impl SessionReducer {
    /// Creates a new reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Check a booking request before the slot is reserved.
///
/// # Errors
///
/// Returns [`BookingError::Validation`] if the mentee owns the slot.
pub fn validate_booking_request(slot: &AvailabilitySlot, mentee_id: UserId) -> Result<(), BookingError> {
    if slot.mentor_id == mentee_id {
        return Err(BookingError::Validation(
            "mentors cannot book their own slots".to_string(),
        ));
    }
    Ok(())
}

/// Notification kind emitted by a committed transition
#[must_use]
pub const fn notification_for(trigger: SessionTrigger) -> NotificationKind {
    match trigger {
        SessionTrigger::Accept => NotificationKind::Confirmation,
        SessionTrigger::Decline | SessionTrigger::Cancel => NotificationKind::Summary,
        SessionTrigger::Complete => NotificationKind::FollowUp,
    }
}

fn loaded(state: &SessionState, session_id: SessionId) -> Result<&Session, BookingError> {
    state
        .session
        .as_ref()
        .filter(|s| s.id == session_id)
        .ok_or_else(|| BookingError::not_found("session", session_id))
}

fn require_participant(
    session: &Session,
    actor_id: UserId,
    action: &'static str,
) -> Result<(), BookingError> {
    if session.is_participant(actor_id) {
        Ok(())
    } else {
        Err(BookingError::Unauthorized { actor_id, action })
    }
}

/// One future effect per recipient of `kind`; reminders fan out in parallel.
fn notify(env: &SessionEnvironment, session: &Session, kind: NotificationKind) -> Effect<SessionAction> {
    let params = TemplateParams {
        status: session.status,
        starts_at: session.range.start(),
    };
    let mut effects: Vec<Effect<SessionAction>> = kind
        .recipients(session)
        .into_iter()
        .map(|user_id| {
            let notifier = Arc::clone(&env.notifier);
            let request = NotificationRequest {
                user_id,
                kind,
                related_session_id: session.id,
                params,
            };
            Effect::future(async move {
                match notifier.notify(request).await {
                    Ok(notification_id) => {
                        metrics::record_notification("delivered");
                        Some(SessionAction::NotificationSent {
                            user_id,
                            kind,
                            notification_id,
                        })
                    },
                    Err(e) => {
                        metrics::record_notification("failed");
                        tracing::warn!(
                            user_id = %user_id,
                            kind = %kind,
                            error = %e,
                            "Notification delivery failed"
                        );
                        Some(SessionAction::NotificationFailed {
                            user_id,
                            kind,
                            error: e.to_string(),
                        })
                    },
                }
            })
        })
        .collect();

    if effects.len() == 1 {
        if let Some(effect) = effects.pop() {
            return effect;
        }
    }
    Effect::merge(effects)
}

impl SessionReducer {
    fn transition(
        state: &mut SessionState,
        session_id: SessionId,
        trigger: SessionTrigger,
        env: &SessionEnvironment,
    ) -> SmallVec<[Effect<SessionAction>; 4]> {
        let from = match loaded(state, session_id) {
            Ok(session) => session.status,
            Err(e) => {
                state.reject(e);
                return SmallVec::new();
            },
        };
        let Some(to) = from.apply(trigger) else {
            state.reject(BookingError::IllegalTransition {
                session_id,
                from,
                trigger,
            });
            return SmallVec::new();
        };

        state.emit(SessionEvent::StatusChanged {
            session_id,
            from,
            to,
            trigger,
            at: env.clock.now(),
        });

        match state.session.as_ref() {
            Some(session) => smallvec![notify(env, session, notification_for(trigger))],
            None => SmallVec::new(),
        }
    }

    fn request(
        state: &mut SessionState,
        session_id: SessionId,
        slot: &AvailabilitySlot,
        mentee_id: UserId,
        env: &SessionEnvironment,
    ) -> SmallVec<[Effect<SessionAction>; 4]> {
        if state.session.is_some() {
            state.reject(BookingError::InvalidState {
                session_id,
                reason: "session already exists".to_string(),
            });
            return SmallVec::new();
        }
        if let Err(e) = validate_booking_request(slot, mentee_id) {
            state.reject(e);
            return SmallVec::new();
        }

        let now = env.clock.now();
        let mut session = Session {
            id: session_id,
            mentor_id: slot.mentor_id,
            mentee_id,
            slot_id: slot.id,
            range: slot.range,
            status: SessionStatus::Requested,
            payment_status: PaymentStatus::Pending,
            notes: None,
            transcript: None,
            video_call_ref: None,
            payment_ref: None,
            created_at: now,
            updated_at: now,
        };
        payment::mark_pending(&mut session);

        let effect = notify(env, &session, NotificationKind::Request);
        state.emit(SessionEvent::Requested { session });
        smallvec![effect]
    }
}

impl Reducer for SessionReducer {
    type State = SessionState;
    type Action = SessionAction;
    type Environment = SessionEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        if !matches!(
            action,
            SessionAction::NotificationSent { .. } | SessionAction::NotificationFailed { .. }
        ) {
            state.last_error = None;
        }

        match action {
            SessionAction::Request {
                session_id,
                slot,
                mentee_id,
            } => Self::request(state, session_id, &slot, mentee_id, env),

            SessionAction::Respond {
                session_id,
                actor_id,
                decision,
            } => {
                let authorized = loaded(state, session_id).and_then(|session| {
                    if session.mentor_id == actor_id {
                        Ok(())
                    } else {
                        Err(BookingError::Unauthorized {
                            actor_id,
                            action: "respond to this request",
                        })
                    }
                });
                if let Err(e) = authorized {
                    state.reject(e);
                    return SmallVec::new();
                }
                Self::transition(state, session_id, decision.trigger(), env)
            },

            SessionAction::Cancel {
                session_id,
                actor_id,
            } => {
                if let Err(e) = loaded(state, session_id)
                    .and_then(|s| require_participant(s, actor_id, "cancel this session"))
                {
                    state.reject(e);
                    return SmallVec::new();
                }
                Self::transition(state, session_id, SessionTrigger::Cancel, env)
            },

            SessionAction::Complete { session_id } => {
                Self::transition(state, session_id, SessionTrigger::Complete, env)
            },

            SessionAction::UpdateNotes {
                session_id,
                actor_id,
                notes,
            } => {
                if let Err(e) = loaded(state, session_id)
                    .and_then(|s| require_participant(s, actor_id, "edit session notes"))
                {
                    state.reject(e);
                    return SmallVec::new();
                }
                state.emit(SessionEvent::NotesUpdated {
                    session_id,
                    notes,
                    at: env.clock.now(),
                });
                SmallVec::new()
            },

            SessionAction::RecordTranscript {
                session_id,
                actor_id,
                transcript,
            } => {
                if let Err(e) = loaded(state, session_id)
                    .and_then(|s| require_participant(s, actor_id, "record a transcript"))
                {
                    state.reject(e);
                    return SmallVec::new();
                }
                state.emit(SessionEvent::TranscriptRecorded {
                    session_id,
                    transcript,
                    at: env.clock.now(),
                });
                SmallVec::new()
            },

            SessionAction::LinkVideoCall {
                session_id,
                call_ref,
            } => {
                let linked = match loaded(state, session_id) {
                    Ok(session) => session.video_call_ref.clone(),
                    Err(e) => {
                        state.reject(e);
                        return SmallVec::new();
                    },
                };
                match linked {
                    Some(existing) if existing == call_ref => {},
                    Some(_) => state.reject(BookingError::InvalidState {
                        session_id,
                        reason: "a different video call is already linked".to_string(),
                    }),
                    None => state.emit(SessionEvent::VideoCallLinked {
                        session_id,
                        call_ref,
                        at: env.clock.now(),
                    }),
                }
                SmallVec::new()
            },

            SessionAction::SendReminder { session_id } => {
                let session = match loaded(state, session_id) {
                    Ok(session) => session,
                    Err(e) => {
                        state.reject(e);
                        return SmallVec::new();
                    },
                };
                if session.status != SessionStatus::Confirmed {
                    let reason = format!(
                        "reminders are only sent for confirmed sessions, session is {}",
                        session.status
                    );
                    state.reject(BookingError::InvalidState { session_id, reason });
                    return SmallVec::new();
                }
                smallvec![notify(env, session, NotificationKind::Reminder)]
            },

            SessionAction::NotificationSent {
                user_id,
                kind,
                notification_id,
            } => {
                state
                    .deliveries
                    .push((user_id, kind, DeliveryOutcome::Delivered(notification_id)));
                SmallVec::new()
            },

            SessionAction::NotificationFailed {
                user_id,
                kind,
                error,
            } => {
                state
                    .deliveries
                    .push((user_id, kind, DeliveryOutcome::Failed(error)));
                SmallVec::new()
            },
        }
    }
}
