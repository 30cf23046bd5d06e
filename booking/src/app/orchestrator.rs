//! Booking Orchestrator.
//!
//! Every command follows the same path: load the session, reduce the command, commit each
//! uncommitted event with one conditional repository write, then run the effects and feed
//! their results back into the reducer. A write that finds the record changed is re-read
//! and reported as a conflict against the status it now has. Nothing is retried.

use crate::aggregates::payment::{self, PaymentAction, PaymentEnvironment, PaymentReducer};
use crate::aggregates::session::{self, SessionAction, SessionEnvironment, SessionReducer};
use crate::aggregates::{SessionEvent, SessionState};
use crate::availability::AvailabilityStore;
use crate::config::{Config, StorageBackend, TimeoutConfig};
use crate::error::{BookingError, Result, StoreError};
use crate::metrics;
use crate::notifications::{NotificationDispatcher, StoredNotificationDispatcher};
use crate::payment_gateway::{Charge, PaymentGateway};
use crate::stores::{
    InMemoryBookingStore, NotificationRepository, PostgresBookingStore, ProfileRepository,
    SessionRepository, SlotRepository, StoreFuture, StoreResult,
};
use crate::types::{
    AvailabilitySlot, Decision, Money, Notification, NotificationId, PaymentId, PaymentMethod,
    PaymentStatus, Session, SessionId, SessionStatus, SlotId, TimeRange, UserId, UserRole,
};
use crate::video::VideoProvider;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use mentorly_core::environment::Clock;
use mentorly_core::reducer::Reducer;
use mentorly_runtime::metrics::{ConcurrencyMetrics, ReducerMetrics};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The repositories the orchestrator writes to.
#[derive(Clone)]
pub struct BookingStores {
    /// Availability slots
    pub slots: Arc<dyn SlotRepository>,
    /// Sessions, payments and video calls
    pub sessions: Arc<dyn SessionRepository>,
    /// Notifications
    pub notifications: Arc<dyn NotificationRepository>,
    /// Mentor profiles
    pub profiles: Arc<dyn ProfileRepository>,
}

impl BookingStores {
    /// One store implementing every repository
    #[must_use]
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: SlotRepository
            + SessionRepository
            + NotificationRepository
            + ProfileRepository
            + 'static,
    {
        Self {
            slots: store.clone(),
            sessions: store.clone(),
            notifications: store.clone(),
            profiles: store,
        }
    }

    /// Fresh in-memory repositories
    #[must_use]
    pub fn in_memory() -> Self {
        Self::shared(Arc::new(InMemoryBookingStore::new()))
    }

    /// Repositories selected by `config.storage`; `PostgreSQL` is migrated on connect.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable or migrations fail.
    pub async fn from_config(config: &Config) -> StoreResult<Self> {
        match config.storage {
            StorageBackend::Memory => Ok(Self::in_memory()),
            StorageBackend::Postgres => {
                let store = PostgresBookingStore::connect(&config.database).await?;
                store.migrate().await?;
                Ok(Self::shared(Arc::new(store)))
            },
        }
    }
}

/// Coordinates availability, session lifecycle, payments and notifications.
pub struct BookingOrchestrator {
    pub(super) availability: AvailabilityStore,
    pub(super) sessions: Arc<dyn SessionRepository>,
    pub(super) notifications: Arc<dyn NotificationRepository>,
    pub(super) profiles: Arc<dyn ProfileRepository>,
    pub(super) gateway: Arc<dyn PaymentGateway>,
    pub(super) video: Arc<dyn VideoProvider>,
    pub(super) clock: Arc<dyn Clock>,
    session_reducer: SessionReducer,
    session_env: SessionEnvironment,
    payment_reducer: PaymentReducer,
    payment_env: PaymentEnvironment,
    external_timeout: Duration,
}

impl BookingOrchestrator {
    /// Creates an orchestrator whose notifications are stored in `stores.notifications`.
    #[must_use]
    pub fn new(
        stores: BookingStores,
        gateway: Arc<dyn PaymentGateway>,
        video: Arc<dyn VideoProvider>,
        clock: Arc<dyn Clock>,
        timeouts: TimeoutConfig,
    ) -> Self {
        let notifier: Arc<dyn NotificationDispatcher> = Arc::new(StoredNotificationDispatcher::new(
            Arc::clone(&stores.notifications),
            Arc::clone(&clock),
            timeouts.notification(),
        ));
        Self {
            availability: AvailabilityStore::new(stores.slots),
            sessions: stores.sessions,
            notifications: stores.notifications,
            profiles: stores.profiles,
            gateway,
            video,
            session_reducer: SessionReducer::new(),
            session_env: SessionEnvironment::new(Arc::clone(&clock), notifier),
            payment_reducer: PaymentReducer::new(),
            payment_env: PaymentEnvironment::new(Arc::clone(&clock)),
            clock,
            external_timeout: timeouts.external_call(),
        }
    }

    /// Replace the notification dispatcher
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.session_env.notifier = notifier;
        self
    }

    /// The Availability Store used for slot operations
    #[must_use]
    pub const fn availability(&self) -> &AvailabilityStore {
        &self.availability
    }

    // ========================================================================
    // Availability
    // ========================================================================

    /// Publish an open slot.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidRange`] or [`BookingError::Overlap`].
    #[tracing::instrument(skip(self))]
    pub async fn publish_slot(
        &self,
        mentor_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilitySlot> {
        self.availability.publish(mentor_id, start, end).await
    }

    /// Lazily list a mentor's open slots.
    #[must_use]
    pub fn list_open_slots(
        &self,
        mentor_id: UserId,
        window: Option<TimeRange>,
    ) -> BoxStream<'_, StoreResult<AvailabilitySlot>> {
        self.availability.list_open(mentor_id, window)
    }

    /// Delete an unbooked slot of `mentor_id`.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], [`BookingError::Unauthorized`] or
    /// [`BookingError::SlotInUse`].
    #[tracing::instrument(skip(self))]
    pub async fn release_slot(&self, slot_id: SlotId, mentor_id: UserId) -> Result<()> {
        self.availability.release(slot_id, mentor_id).await
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Book `slot_id` of `mentor_id` for `mentee_id`.
    ///
    /// Reserves the slot, creates a `requested` session and notifies the mentor. If the
    /// session cannot be created, the reservation is rolled back before returning.
    ///
    /// # Errors
    ///
    /// - [`BookingError::AlreadyBooked`]: another booking won the slot
    /// - [`BookingError::NotFound`]: no such slot
    /// - [`BookingError::Validation`]: the slot is not the mentor's, or the mentor books
    ///   their own slot
    #[tracing::instrument(skip(self))]
    pub async fn request_booking(
        &self,
        mentor_id: UserId,
        mentee_id: UserId,
        slot_id: SlotId,
    ) -> Result<Session> {
        let slot = self.availability.get(slot_id).await?;
        if slot.mentor_id != mentor_id {
            return Err(BookingError::Validation(format!(
                "slot {slot_id} does not belong to mentor {mentor_id}"
            )));
        }
        session::validate_booking_request(&slot, mentee_id)?;

        let reserved = match self.availability.reserve(slot_id).await {
            Ok(slot) => slot,
            Err(e) => {
                metrics::record_booking(match &e {
                    BookingError::AlreadyBooked(_) => "already_booked",
                    _ => "failed",
                });
                return Err(e);
            },
        };

        let mut state = SessionState::new();
        let effects = self.session_reducer.reduce(
            &mut state,
            SessionAction::Request {
                session_id: SessionId::new(),
                slot: reserved,
                mentee_id,
            },
            &self.session_env,
        );
        ReducerMetrics::record_action("session");

        let created = match state.last_error.take() {
            Some(e) => {
                ReducerMetrics::record_rejection("session", e.code());
                Err(e)
            },
            None => self.commit(&mut state).await,
        };
        if let Err(e) = created {
            metrics::record_booking("failed");
            self.compensate_reservation(slot_id, &e).await;
            return Err(e);
        }

        metrics::record_booking("created");
        mentorly_runtime::drive(&self.session_reducer, &mut state, &self.session_env, effects)
            .await;
        let session = Self::committed(state)?;
        tracing::info!(session_id = %session.id, "Booking requested");
        Ok(session)
    }

    /// Mentor accepts or declines a requested session.
    ///
    /// Declined sessions keep their slot booked.
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`] unless `mentor_id` is the session's mentor;
    /// [`BookingError::IllegalTransition`] unless the session is `requested`.
    #[tracing::instrument(skip(self))]
    pub async fn respond_to_request(
        &self,
        session_id: SessionId,
        mentor_id: UserId,
        decision: Decision,
    ) -> Result<Session> {
        self.run_session_command(
            session_id,
            SessionAction::Respond {
                session_id,
                actor_id: mentor_id,
                decision,
            },
        )
        .await
    }

    /// A participant cancels a confirmed session; a completed payment is refunded.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Unauthorized`]: actor is not a participant
    /// - [`BookingError::IllegalTransition`]: session is not `confirmed`
    /// - [`BookingError::Payment`]: the cancellation is committed but the refund failed;
    ///   [`Self::refund_session`] retries it
    #[tracing::instrument(skip(self))]
    pub async fn cancel_session(&self, session_id: SessionId, actor_id: UserId) -> Result<Session> {
        let session = self
            .run_session_command(
                session_id,
                SessionAction::Cancel {
                    session_id,
                    actor_id,
                },
            )
            .await?;

        if session.payment_status == PaymentStatus::Completed {
            return self.refund_paid_session(session).await;
        }
        Ok(session)
    }

    /// Mark a confirmed session completed.
    ///
    /// # Errors
    ///
    /// [`BookingError::IllegalTransition`] unless the session is `confirmed`.
    #[tracing::instrument(skip(self))]
    pub async fn complete_session(&self, session_id: SessionId) -> Result<Session> {
        self.run_session_command(session_id, SessionAction::Complete { session_id })
            .await
    }

    /// Remind both participants of a confirmed session.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidState`] unless the session is `confirmed`.
    #[tracing::instrument(skip(self))]
    pub async fn send_reminder(&self, session_id: SessionId) -> Result<Session> {
        self.run_session_command(session_id, SessionAction::SendReminder { session_id })
            .await
    }

    /// Replace the notes of a session.
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`] unless the actor is a participant.
    #[tracing::instrument(skip(self, notes))]
    pub async fn update_notes(
        &self,
        session_id: SessionId,
        actor_id: UserId,
        notes: Option<String>,
    ) -> Result<Session> {
        self.run_session_command(
            session_id,
            SessionAction::UpdateNotes {
                session_id,
                actor_id,
                notes,
            },
        )
        .await
    }

    /// Store the call transcript of a session.
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`] unless the actor is a participant.
    #[tracing::instrument(skip(self, transcript))]
    pub async fn record_transcript(
        &self,
        session_id: SessionId,
        actor_id: UserId,
        transcript: String,
    ) -> Result<Session> {
        self.run_session_command(
            session_id,
            SessionAction::RecordTranscript {
                session_id,
                actor_id,
                transcript,
            },
        )
        .await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// A session, visible to its participants only.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] or [`BookingError::Unauthorized`].
    pub async fn get_session(&self, session_id: SessionId, actor_id: UserId) -> Result<Session> {
        let session = self.load_session(session_id).await?;
        if !session.is_participant(actor_id) {
            return Err(BookingError::Unauthorized {
                actor_id,
                action: "view this session",
            });
        }
        Ok(session)
    }

    /// Sessions where `user_id` plays `role`, newest start first.
    ///
    /// # Errors
    ///
    /// [`BookingError::Storage`] on repository failure.
    pub async fn sessions_for(&self, user_id: UserId, role: UserRole) -> Result<Vec<Session>> {
        Ok(self.sessions.sessions_for(user_id, role).await?)
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Charge the mentee and record the payment.
    ///
    /// If the charge succeeds but the session changed meanwhile, the charge is refunded
    /// at the processor and the conflict is returned.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Unauthorized`]: payer is not the mentee
    /// - [`BookingError::InvalidState`]: session not payable or already paid
    /// - [`BookingError::Payment`] / [`BookingError::Timeout`]: the processor failed
    #[tracing::instrument(skip(self, method))]
    pub async fn pay_for_session(
        &self,
        session_id: SessionId,
        payer_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<Session> {
        let session = self.load_session(session_id).await?;
        payment::validate_complete(&session, payer_id, amount)?;

        let payment_id = PaymentId::new();
        let charge = self
            .bounded("payment charge", self.gateway.charge(payment_id, amount, method.clone()))
            .await?
            .map_err(|e| {
                metrics::record_payment("failed", 0);
                BookingError::Payment(e.to_string())
            })?;

        let mut state = SessionState::loaded(session);
        self.payment_reducer.reduce(
            &mut state,
            PaymentAction::Complete {
                session_id,
                payer_id,
                payment_id,
                amount,
                method,
                transaction_ref: charge.transaction_ref.clone(),
            },
            &self.payment_env,
        );
        ReducerMetrics::record_action("payment");

        let recorded = match state.last_error.take() {
            Some(e) => {
                ReducerMetrics::record_rejection("payment", e.code());
                Err(e)
            },
            None => self.commit(&mut state).await,
        };
        if let Err(e) = recorded {
            self.void_charge(&charge).await;
            return Err(e);
        }

        tracing::info!(session_id = %session_id, payment_id = %payment_id, "Payment completed");
        Self::committed(state)
    }

    /// Retry the refund of a cancelled, paid session.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Unauthorized`]: actor is not a participant
    /// - [`BookingError::InvalidState`]: session not cancelled or payment not completed
    /// - [`BookingError::Payment`]: the processor refused the refund
    #[tracing::instrument(skip(self))]
    pub async fn refund_session(&self, session_id: SessionId, actor_id: UserId) -> Result<Session> {
        let session = self.load_session(session_id).await?;
        if !session.is_participant(actor_id) {
            return Err(BookingError::Unauthorized {
                actor_id,
                action: "refund this session",
            });
        }
        if session.status != SessionStatus::Cancelled {
            return Err(BookingError::InvalidState {
                session_id,
                reason: format!("only cancelled sessions are refunded, session is {}", session.status),
            });
        }
        self.refund_paid_session(session).await
    }

    // ========================================================================
    // Notification center
    // ========================================================================

    /// A user's notifications, newest first.
    ///
    /// # Errors
    ///
    /// [`BookingError::Storage`] on repository failure.
    pub async fn notifications_for(&self, user_id: UserId) -> Result<Vec<Notification>> {
        Ok(self.notifications.notifications_for(user_id).await?)
    }

    /// Number of unread notifications of a user.
    ///
    /// # Errors
    ///
    /// [`BookingError::Storage`] on repository failure.
    pub async fn unread_count(&self, user_id: UserId) -> Result<u64> {
        Ok(self.notifications.unread_count(user_id).await?)
    }

    /// Mark a notification read; only its recipient may do so.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] or [`BookingError::Unauthorized`].
    #[tracing::instrument(skip(self))]
    pub async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
        user_id: UserId,
    ) -> Result<Notification> {
        let notification = self
            .notifications
            .get_notification(notification_id)
            .await?
            .ok_or_else(|| BookingError::not_found("notification", notification_id))?;
        if notification.user_id != user_id {
            return Err(BookingError::Unauthorized {
                actor_id: user_id,
                action: "read this notification",
            });
        }
        Ok(self.notifications.mark_read(notification_id).await?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(super) async fn load_session(&self, session_id: SessionId) -> Result<Session> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| BookingError::not_found("session", session_id))
    }

    /// Load, reduce, commit, then run effects.
    pub(super) async fn run_session_command(
        &self,
        session_id: SessionId,
        action: SessionAction,
    ) -> Result<Session> {
        let session = self.load_session(session_id).await?;
        let mut state = SessionState::loaded(session);

        let effects = self
            .session_reducer
            .reduce(&mut state, action, &self.session_env);
        ReducerMetrics::record_action("session");
        if let Some(e) = state.last_error.take() {
            ReducerMetrics::record_rejection("session", e.code());
            return Err(e);
        }

        self.commit(&mut state).await?;
        mentorly_runtime::drive(&self.session_reducer, &mut state, &self.session_env, effects)
            .await;
        Self::committed(state)
    }

    /// Write every uncommitted event; the stored row replaces the in-memory session.
    async fn commit(&self, state: &mut SessionState) -> Result<()> {
        for event in state.take_uncommitted() {
            match self.write_event(&event).await {
                Ok(session) => {
                    Self::observe_committed(&event);
                    state.session = Some(session);
                },
                Err(StoreError::Stale { .. }) => {
                    ConcurrencyMetrics::record_conflict("session");
                    return Err(self.stale_conflict(&event).await);
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn write_event(&self, event: &SessionEvent) -> StoreFuture<'_, Session> {
        let repo = &self.sessions;
        match event.clone() {
            SessionEvent::Requested { session } => repo.insert_session(session),
            SessionEvent::StatusChanged {
                session_id,
                from,
                to,
                at,
                ..
            } => repo.transition_status(session_id, from, to, at),
            SessionEvent::NotesUpdated {
                session_id,
                notes,
                at,
            } => repo.update_notes(session_id, notes, at),
            SessionEvent::TranscriptRecorded {
                session_id,
                transcript,
                at,
            } => repo.update_transcript(session_id, transcript, at),
            SessionEvent::VideoCallLinked {
                session_id,
                call_ref,
                at,
            } => repo.link_video_call(session_id, call_ref, at),
            SessionEvent::PaymentCompleted { payment, at } => repo.complete_payment(payment, at),
            SessionEvent::PaymentRefunded { session_id, at, .. } => {
                repo.refund_payment(session_id, at)
            },
        }
    }

    fn observe_committed(event: &SessionEvent) {
        match event {
            SessionEvent::StatusChanged {
                session_id,
                from,
                to,
                trigger,
                ..
            } => {
                metrics::record_transition(to.as_str());
                tracing::info!(
                    session_id = %session_id,
                    from = %from,
                    to = %to,
                    trigger = %trigger,
                    "Session transition committed"
                );
            },
            SessionEvent::PaymentCompleted { payment, .. } => {
                metrics::record_payment("completed", payment.amount.cents());
            },
            SessionEvent::PaymentRefunded { .. } => metrics::record_payment("refunded", 0),
            SessionEvent::Requested { .. }
            | SessionEvent::NotesUpdated { .. }
            | SessionEvent::TranscriptRecorded { .. }
            | SessionEvent::VideoCallLinked { .. } => {},
        }
    }

    /// Conflict error for a conditional write that lost, based on the current row.
    async fn stale_conflict(&self, event: &SessionEvent) -> BookingError {
        let session_id = event.session_id();
        let current = match self.load_session(session_id).await {
            Ok(session) => session,
            Err(e) => return e,
        };
        tracing::debug!(
            session_id = %session_id,
            status = %current.status,
            payment_status = %current.payment_status,
            "Conditional write lost a race"
        );

        match event {
            SessionEvent::StatusChanged { trigger, .. } => BookingError::IllegalTransition {
                session_id,
                from: current.status,
                trigger: *trigger,
            },
            SessionEvent::PaymentCompleted { .. } => BookingError::InvalidState {
                session_id,
                reason: format!(
                    "payment can no longer be completed: session is {}, payment is {}",
                    current.status, current.payment_status
                ),
            },
            SessionEvent::PaymentRefunded { .. } => BookingError::InvalidState {
                session_id,
                reason: format!("payment is {}, nothing to refund", current.payment_status),
            },
            SessionEvent::VideoCallLinked { .. } => BookingError::InvalidState {
                session_id,
                reason: "a different video call is already linked".to_string(),
            },
            SessionEvent::Requested { .. }
            | SessionEvent::NotesUpdated { .. }
            | SessionEvent::TranscriptRecorded { .. } => BookingError::StaleState {
                entity: "session",
                id: session_id.to_string(),
            },
        }
    }

    /// Claim the refund, refund at the processor, then record it.
    async fn refund_paid_session(&self, session: Session) -> Result<Session> {
        let session_id = session.id;
        payment::validate_refund(&session)?;
        let payment_id = session.payment_ref.ok_or_else(|| BookingError::InvalidState {
            session_id,
            reason: "completed payment has no payment record".to_string(),
        })?;
        let record = self
            .sessions
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BookingError::not_found("payment", payment_id))?;

        let mut state = SessionState::loaded(session);
        self.payment_reducer
            .reduce(&mut state, PaymentAction::Refund { session_id }, &self.payment_env);
        ReducerMetrics::record_action("payment");
        if let Some(e) = state.last_error.take() {
            ReducerMetrics::record_rejection("payment", e.code());
            return Err(e);
        }

        self.claim_refund(session_id).await?;
        let refunded = self
            .bounded(
                "payment refund",
                self.gateway.refund(&record.transaction_ref, record.amount),
            )
            .await
            .and_then(|result| result.map_err(|e| BookingError::Payment(e.to_string())));
        if let Err(e) = refunded {
            metrics::record_payment("failed", 0);
            tracing::warn!(
                session_id = %session_id,
                payment_id = %payment_id,
                error = %e,
                "Refund failed, payment stays completed"
            );
            if let Err(release) = self.sessions.release_refund_claim(session_id).await {
                tracing::error!(
                    session_id = %session_id,
                    error = %release,
                    "Failed to release refund claim"
                );
            }
            return Err(e);
        }

        self.commit(&mut state).await?;
        tracing::info!(session_id = %session_id, payment_id = %payment_id, "Payment refunded");
        Self::committed(state)
    }

    /// Take the refund claim so only one caller reaches the processor.
    ///
    /// A claim older than twice the external call budget is treated as abandoned.
    async fn claim_refund(&self, session_id: SessionId) -> Result<()> {
        let now = self.clock.now();
        let lease = chrono::Duration::from_std(self.external_timeout.saturating_mul(2))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        match self.sessions.claim_refund(session_id, now, now - lease).await {
            Ok(_) => Ok(()),
            Err(StoreError::Stale { .. }) => {
                ConcurrencyMetrics::record_conflict("session");
                let current = self.load_session(session_id).await?;
                let reason = if current.payment_status == PaymentStatus::Completed {
                    "a refund is already in progress".to_string()
                } else {
                    format!("payment is {}, nothing to refund", current.payment_status)
                };
                Err(BookingError::InvalidState { session_id, reason })
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Roll back a reservation whose session was never created.
    async fn compensate_reservation(&self, slot_id: SlotId, cause: &BookingError) {
        match self.availability.unreserve(slot_id).await {
            Ok(_) => {
                metrics::record_compensation("released");
                tracing::warn!(
                    slot_id = %slot_id,
                    cause = %cause,
                    "Session creation failed, slot reservation rolled back"
                );
            },
            Err(e) => {
                metrics::record_compensation("failed");
                tracing::error!(
                    slot_id = %slot_id,
                    cause = %cause,
                    error = %e,
                    "Failed to roll back slot reservation"
                );
            },
        }
    }

    /// Refund a charge that could not be recorded.
    async fn void_charge(&self, charge: &Charge) {
        let refunded = self
            .bounded(
                "payment void",
                self.gateway.refund(&charge.transaction_ref, charge.amount),
            )
            .await;
        match refunded {
            Ok(Ok(refund_ref)) => tracing::warn!(
                payment_id = %charge.payment_id,
                refund_ref = %refund_ref,
                "Charge voided after the payment could not be recorded"
            ),
            Ok(Err(e)) => tracing::error!(
                payment_id = %charge.payment_id,
                transaction_ref = %charge.transaction_ref,
                error = %e,
                "Failed to void unrecorded charge"
            ),
            Err(e) => tracing::error!(
                payment_id = %charge.payment_id,
                transaction_ref = %charge.transaction_ref,
                error = %e,
                "Failed to void unrecorded charge"
            ),
        }
    }

    /// Run an external call under the configured time budget.
    pub(super) async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = T>,
    ) -> Result<T> {
        tokio::time::timeout(self.external_timeout, call)
            .await
            .map_err(|_| BookingError::Timeout {
                operation,
                timeout_ms: u64::try_from(self.external_timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }

    fn committed(state: SessionState) -> Result<Session> {
        state
            .session
            .ok_or_else(|| BookingError::Storage("session missing after commit".to_string()))
    }
}
