//! Repositories at the persistence boundary.
//!
//! Every write that protects an invariant is a single conditional operation on the
//! backing store: slot reservation flips `is_booked` only if it is still `false`, status
//! transitions only apply while the row still holds the expected pre-status, and the
//! payment update only applies while the payment is still pending. A write that finds
//! the row changed reports [`StoreError::Stale`] instead of overwriting it.
//!
//! The traits return boxed futures (and a boxed stream for slot listings) so they stay
//! object safe and can be shared as `Arc<dyn ...>`.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryBookingStore;
pub use postgres::PostgresBookingStore;

use crate::error::StoreError;
use crate::types::{
    AvailabilitySlot, MentorProfile, Notification, NotificationId, Payment, PaymentId,
    ProfileUpdate, Session, SessionId, SessionStatus, SlotId, TimeRange, UserId, UserRole,
    VideoCall,
};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;

/// Result type for repository operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future returned by repository methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Storage for availability slots.
pub trait SlotRepository: Send + Sync {
    /// Insert a new open slot.
    ///
    /// The overlap check and the insert are one atomic step.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Overlap`]: the range intersects an open slot of the same mentor
    /// - [`StoreError::Database`]: backend failure
    fn insert_slot(&self, slot: AvailabilitySlot) -> StoreFuture<'_, AvailabilitySlot>;

    /// Fetch one slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn get_slot(&self, slot_id: SlotId) -> StoreFuture<'_, Option<AvailabilitySlot>>;

    /// Lazily list a mentor's unbooked slots ordered by start time, optionally limited
    /// to slots starting inside `window`. Every call starts a fresh listing.
    fn open_slots(
        &self,
        mentor_id: UserId,
        window: Option<TimeRange>,
    ) -> BoxStream<'_, StoreResult<AvailabilitySlot>>;

    /// Compare-and-swap `is_booked` from `false` to `true`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such slot
    /// - [`StoreError::AlreadyBooked`]: another reservation won
    fn reserve_slot(&self, slot_id: SlotId) -> StoreFuture<'_, AvailabilitySlot>;

    /// Compare-and-swap `is_booked` from `true` back to `false`.
    ///
    /// Only used to compensate a booking whose session could not be created.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such slot
    /// - [`StoreError::Stale`]: the slot is not booked
    /// - [`StoreError::Overlap`]: reopening would overlap a slot published meanwhile
    fn unreserve_slot(&self, slot_id: SlotId) -> StoreFuture<'_, AvailabilitySlot>;

    /// Delete a slot that is not booked.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such slot
    /// - [`StoreError::SlotInUse`]: the slot is booked
    fn delete_open_slot(&self, slot_id: SlotId) -> StoreFuture<'_, ()>;
}

/// Storage for sessions and the payment and video-call records attached to them.
pub trait SessionRepository: Send + Sync {
    /// Insert a freshly requested session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn insert_session(&self, session: Session) -> StoreFuture<'_, Session>;

    /// Fetch one session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn get_session(&self, session_id: SessionId) -> StoreFuture<'_, Option<Session>>;

    /// Sessions where `user_id` plays `role`, newest start first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn sessions_for(&self, user_id: UserId, role: UserRole) -> StoreFuture<'_, Vec<Session>>;

    /// Set `status = to` only if the stored status is still `from`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such session
    /// - [`StoreError::Stale`]: the status changed since it was read
    fn transition_status(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session>;

    /// Record a completed payment: insert the payment row and set the session's
    /// `payment_status = completed` and `payment_ref`, only while the payment is
    /// pending and the session is `requested` or `confirmed`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such session
    /// - [`StoreError::Stale`]: the session no longer accepts payment
    fn complete_payment(&self, payment: Payment, at: DateTime<Utc>) -> StoreFuture<'_, Session>;

    /// Claim the right to refund a completed payment at the processor.
    ///
    /// Succeeds only while `payment_status = completed` and no other claim is held.
    /// A claim taken before `abandoned_before` belongs to a caller that never finished
    /// and may be taken over.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such session
    /// - [`StoreError::Stale`]: the payment is not completed or another refund holds
    ///   the claim
    fn claim_refund(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        abandoned_before: DateTime<Utc>,
    ) -> StoreFuture<'_, Session>;

    /// Drop a refund claim after the processor refused the refund.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn release_refund_claim(&self, session_id: SessionId) -> StoreFuture<'_, ()>;

    /// Set `payment_status = refunded` (session and payment row) only while it is
    /// `completed`. Clears any refund claim.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such session
    /// - [`StoreError::Stale`]: the payment is not completed any more
    fn refund_payment(&self, session_id: SessionId, at: DateTime<Utc>)
    -> StoreFuture<'_, Session>;

    /// Fetch a payment record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn get_payment(&self, payment_id: PaymentId) -> StoreFuture<'_, Option<Payment>>;

    /// Replace the session notes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the session does not exist.
    fn update_notes(
        &self,
        session_id: SessionId,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session>;

    /// Replace the session transcript.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the session does not exist.
    fn update_transcript(
        &self,
        session_id: SessionId,
        transcript: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session>;

    /// Set `video_call_ref` only if it is unset or already equal to `call_ref`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such session
    /// - [`StoreError::Stale`]: a different call is already linked
    fn link_video_call(
        &self,
        session_id: SessionId,
        call_ref: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session>;

    /// Insert or replace the video call record of a session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn save_video_call(&self, call: VideoCall) -> StoreFuture<'_, ()>;

    /// Video call record of a session, if one was created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn video_call_for(&self, session_id: SessionId) -> StoreFuture<'_, Option<VideoCall>>;
}

/// Storage for notifications.
pub trait NotificationRepository: Send + Sync {
    /// Persist a notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn insert_notification(&self, notification: Notification) -> StoreFuture<'_, Notification>;

    /// Fetch one notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn get_notification(
        &self,
        notification_id: NotificationId,
    ) -> StoreFuture<'_, Option<Notification>>;

    /// A user's notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn notifications_for(&self, user_id: UserId) -> StoreFuture<'_, Vec<Notification>>;

    /// Number of unread notifications of a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn unread_count(&self, user_id: UserId) -> StoreFuture<'_, u64>;

    /// Set `read = true`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the notification does not exist.
    fn mark_read(&self, notification_id: NotificationId) -> StoreFuture<'_, Notification>;
}

/// Storage for mentor profiles.
pub trait ProfileRepository: Send + Sync {
    /// Fetch a mentor's profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn get_profile(&self, mentor_id: UserId) -> StoreFuture<'_, Option<MentorProfile>>;

    /// Apply `update` to the mentor's profile, creating it if it does not exist.
    ///
    /// The read and the write are one atomic step, so concurrent partial updates of
    /// different fields are all kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn upsert_profile(
        &self,
        mentor_id: UserId,
        update: ProfileUpdate,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, MentorProfile>;

    /// Profiles listing `domain` (lowercase), or every profile for `None`; most
    /// recently updated first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn profiles_in_domain(&self, domain: Option<String>) -> StoreFuture<'_, Vec<MentorProfile>>;
}
