//! In-memory implementation of all booking repositories.
//!
//! Each table sits behind its own `tokio::sync::RwLock`; a conditional write holds the
//! write lock for the check and the update, which makes it atomic with respect to
//! every other caller. Operations touching several tables always lock `sessions` first,
//! then `payments`, then `refund_claims`.

use super::{
    NotificationRepository, ProfileRepository, SessionRepository, SlotRepository, StoreFuture,
    StoreResult,
};
use crate::error::StoreError;
use crate::types::{
    AvailabilitySlot, MentorProfile, Notification, NotificationId, Payment, PaymentId,
    PaymentStatus, ProfileUpdate, Session, SessionId, SessionStatus, SlotId, TimeRange, UserId,
    UserRole, VideoCall,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Booking store kept in process memory.
///
/// Used by tests and the demo binary. Semantics match the PostgreSQL store.
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    slots: RwLock<HashMap<SlotId, AvailabilitySlot>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    payments: RwLock<HashMap<PaymentId, Payment>>,
    video_calls: RwLock<HashMap<SessionId, VideoCall>>,
    notifications: RwLock<Vec<Notification>>,
    refund_claims: RwLock<HashMap<SessionId, DateTime<Utc>>>,
    profiles: RwLock<HashMap<UserId, MentorProfile>>,
}

impl InMemoryBookingStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn overlaps_open_slot(
    slots: &HashMap<SlotId, AvailabilitySlot>,
    candidate: &AvailabilitySlot,
) -> bool {
    slots.values().any(|existing| {
        existing.id != candidate.id
            && existing.mentor_id == candidate.mentor_id
            && !existing.is_booked
            && existing.range.overlaps(&candidate.range)
    })
}

impl SlotRepository for InMemoryBookingStore {
    fn insert_slot(&self, slot: AvailabilitySlot) -> StoreFuture<'_, AvailabilitySlot> {
        Box::pin(async move {
            let mut slots = self.slots.write().await;
            if overlaps_open_slot(&slots, &slot) {
                return Err(StoreError::Overlap {
                    mentor_id: slot.mentor_id,
                    start: slot.range.start(),
                    end: slot.range.end(),
                });
            }
            slots.insert(slot.id, slot.clone());
            Ok(slot)
        })
    }

    fn get_slot(&self, slot_id: SlotId) -> StoreFuture<'_, Option<AvailabilitySlot>> {
        Box::pin(async move { Ok(self.slots.read().await.get(&slot_id).cloned()) })
    }

    fn open_slots(
        &self,
        mentor_id: UserId,
        window: Option<TimeRange>,
    ) -> BoxStream<'_, StoreResult<AvailabilitySlot>> {
        stream::once(async move {
            let slots = self.slots.read().await;
            let mut open: Vec<AvailabilitySlot> = slots
                .values()
                .filter(|slot| slot.mentor_id == mentor_id && !slot.is_booked)
                .filter(|slot| window.is_none_or(|window| slot.range.starts_within(&window)))
                .cloned()
                .collect();
            open.sort_by_key(|slot| slot.range.start());
            stream::iter(open.into_iter().map(Ok))
        })
        .flatten()
        .boxed()
    }

    fn reserve_slot(&self, slot_id: SlotId) -> StoreFuture<'_, AvailabilitySlot> {
        Box::pin(async move {
            let mut slots = self.slots.write().await;
            let slot = slots
                .get_mut(&slot_id)
                .ok_or_else(|| StoreError::not_found("slot", slot_id))?;
            if slot.is_booked {
                return Err(StoreError::AlreadyBooked(slot_id));
            }
            slot.is_booked = true;
            Ok(slot.clone())
        })
    }

    fn unreserve_slot(&self, slot_id: SlotId) -> StoreFuture<'_, AvailabilitySlot> {
        Box::pin(async move {
            let mut slots = self.slots.write().await;
            let slot = slots
                .get(&slot_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("slot", slot_id))?;
            if !slot.is_booked {
                return Err(StoreError::stale("slot", slot_id));
            }
            let reopened = AvailabilitySlot {
                is_booked: false,
                ..slot
            };
            if overlaps_open_slot(&slots, &reopened) {
                return Err(StoreError::Overlap {
                    mentor_id: reopened.mentor_id,
                    start: reopened.range.start(),
                    end: reopened.range.end(),
                });
            }
            slots.insert(slot_id, reopened.clone());
            Ok(reopened)
        })
    }

    fn delete_open_slot(&self, slot_id: SlotId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut slots = self.slots.write().await;
            match slots.get(&slot_id) {
                None => Err(StoreError::not_found("slot", slot_id)),
                Some(slot) if slot.is_booked => Err(StoreError::SlotInUse(slot_id)),
                Some(_) => {
                    slots.remove(&slot_id);
                    Ok(())
                },
            }
        })
    }
}

impl InMemoryBookingStore {
    /// Apply `update` to a session if `guard` accepts its current state.
    async fn update_session_if<G, U>(
        &self,
        session_id: SessionId,
        guard: G,
        update: U,
    ) -> StoreResult<Session>
    where
        G: FnOnce(&Session) -> bool + Send,
        U: FnOnce(&mut Session) + Send,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::not_found("session", session_id))?;
        if !guard(&*session) {
            return Err(StoreError::stale("session", session_id));
        }
        update(session);
        Ok(session.clone())
    }
}

impl SessionRepository for InMemoryBookingStore {
    fn insert_session(&self, session: Session) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&session.id) {
                return Err(StoreError::Database(format!(
                    "Session {} already exists",
                    session.id
                )));
            }
            sessions.insert(session.id, session.clone());
            Ok(session)
        })
    }

    fn get_session(&self, session_id: SessionId) -> StoreFuture<'_, Option<Session>> {
        Box::pin(async move { Ok(self.sessions.read().await.get(&session_id).cloned()) })
    }

    fn sessions_for(&self, user_id: UserId, role: UserRole) -> StoreFuture<'_, Vec<Session>> {
        Box::pin(async move {
            let sessions = self.sessions.read().await;
            let mut matching: Vec<Session> = sessions
                .values()
                .filter(|session| match role {
                    UserRole::Mentor => session.mentor_id == user_id,
                    UserRole::Mentee => session.mentee_id == user_id,
                })
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.range.start().cmp(&a.range.start()));
            Ok(matching)
        })
    }

    fn transition_status(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(self.update_session_if(
            session_id,
            move |session| session.status == from,
            move |session| {
                session.status = to;
                session.updated_at = at;
            },
        ))
    }

    fn complete_payment(&self, payment: Payment, at: DateTime<Utc>) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            let mut payments = self.payments.write().await;
            let session = sessions
                .get_mut(&payment.session_id)
                .ok_or_else(|| StoreError::not_found("session", payment.session_id))?;
            let accepts_payment = session.payment_status == PaymentStatus::Pending
                && matches!(
                    session.status,
                    SessionStatus::Requested | SessionStatus::Confirmed
                );
            if !accepts_payment {
                return Err(StoreError::stale("session", session.id));
            }
            session.payment_status = PaymentStatus::Completed;
            session.payment_ref = Some(payment.id);
            session.updated_at = at;
            payments.insert(payment.id, payment);
            Ok(session.clone())
        })
    }

    fn claim_refund(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        abandoned_before: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let sessions = self.sessions.read().await;
            let mut claims = self.refund_claims.write().await;
            let session = sessions
                .get(&session_id)
                .ok_or_else(|| StoreError::not_found("session", session_id))?;
            let held = claims
                .get(&session_id)
                .is_some_and(|claimed_at| *claimed_at >= abandoned_before);
            if session.payment_status != PaymentStatus::Completed || held {
                return Err(StoreError::stale("session", session_id));
            }
            claims.insert(session_id, at);
            Ok(session.clone())
        })
    }

    fn release_refund_claim(&self, session_id: SessionId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.refund_claims.write().await.remove(&session_id);
            Ok(())
        })
    }

    fn refund_payment(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            let mut payments = self.payments.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| StoreError::not_found("session", session_id))?;
            if session.payment_status != PaymentStatus::Completed {
                return Err(StoreError::stale("session", session_id));
            }
            self.refund_claims.write().await.remove(&session_id);
            session.payment_status = PaymentStatus::Refunded;
            session.updated_at = at;
            if let Some(payment) = session.payment_ref.and_then(|id| payments.get_mut(&id)) {
                payment.status = PaymentStatus::Refunded;
            }
            Ok(session.clone())
        })
    }

    fn get_payment(&self, payment_id: PaymentId) -> StoreFuture<'_, Option<Payment>> {
        Box::pin(async move { Ok(self.payments.read().await.get(&payment_id).cloned()) })
    }

    fn update_notes(
        &self,
        session_id: SessionId,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(self.update_session_if(
            session_id,
            |_| true,
            move |session| {
                session.notes = notes;
                session.updated_at = at;
            },
        ))
    }

    fn update_transcript(
        &self,
        session_id: SessionId,
        transcript: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(self.update_session_if(
            session_id,
            |_| true,
            move |session| {
                session.transcript = Some(transcript);
                session.updated_at = at;
            },
        ))
    }

    fn link_video_call(
        &self,
        session_id: SessionId,
        call_ref: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let guard_ref = call_ref.clone();
            self.update_session_if(
                session_id,
                move |session| {
                    session
                        .video_call_ref
                        .as_ref()
                        .is_none_or(|linked| *linked == guard_ref)
                },
                move |session| {
                    session.video_call_ref = Some(call_ref);
                    session.updated_at = at;
                },
            )
            .await
        })
    }

    fn save_video_call(&self, call: VideoCall) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.video_calls.write().await.insert(call.session_id, call);
            Ok(())
        })
    }

    fn video_call_for(&self, session_id: SessionId) -> StoreFuture<'_, Option<VideoCall>> {
        Box::pin(async move { Ok(self.video_calls.read().await.get(&session_id).cloned()) })
    }
}

impl NotificationRepository for InMemoryBookingStore {
    fn insert_notification(&self, notification: Notification) -> StoreFuture<'_, Notification> {
        Box::pin(async move {
            self.notifications.write().await.push(notification.clone());
            Ok(notification)
        })
    }

    fn get_notification(
        &self,
        notification_id: NotificationId,
    ) -> StoreFuture<'_, Option<Notification>> {
        Box::pin(async move {
            Ok(self
                .notifications
                .read()
                .await
                .iter()
                .find(|n| n.id == notification_id)
                .cloned())
        })
    }

    fn notifications_for(&self, user_id: UserId) -> StoreFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            let notifications = self.notifications.read().await;
            // Stored in insertion order; the reverse keeps ties on created_at newest first.
            let mut mine: Vec<Notification> = notifications
                .iter()
                .rev()
                .filter(|n| n.user_id == user_id)
                .cloned()
                .collect();
            mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(mine)
        })
    }

    fn unread_count(&self, user_id: UserId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let notifications = self.notifications.read().await;
            let unread = notifications
                .iter()
                .filter(|n| n.user_id == user_id && !n.read)
                .count();
            Ok(u64::try_from(unread).unwrap_or(u64::MAX))
        })
    }

    fn mark_read(&self, notification_id: NotificationId) -> StoreFuture<'_, Notification> {
        Box::pin(async move {
            let mut notifications = self.notifications.write().await;
            let notification = notifications
                .iter_mut()
                .find(|n| n.id == notification_id)
                .ok_or_else(|| StoreError::not_found("notification", notification_id))?;
            notification.read = true;
            Ok(notification.clone())
        })
    }
}

impl ProfileRepository for InMemoryBookingStore {
    fn get_profile(&self, mentor_id: UserId) -> StoreFuture<'_, Option<MentorProfile>> {
        Box::pin(async move { Ok(self.profiles.read().await.get(&mentor_id).cloned()) })
    }

    fn upsert_profile(
        &self,
        mentor_id: UserId,
        update: ProfileUpdate,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, MentorProfile> {
        Box::pin(async move {
            let mut profiles = self.profiles.write().await;
            let profile = profiles
                .entry(mentor_id)
                .or_insert_with(|| MentorProfile::empty(mentor_id, at));
            update.apply_to(profile, at);
            Ok(profile.clone())
        })
    }

    fn profiles_in_domain(&self, domain: Option<String>) -> StoreFuture<'_, Vec<MentorProfile>> {
        Box::pin(async move {
            let profiles = self.profiles.read().await;
            let mut matching: Vec<MentorProfile> = profiles
                .values()
                .filter(|profile| domain.as_deref().is_none_or(|d| profile.covers(d)))
                .cloned()
                .collect();
            matching.sort_by(|a, b| {
                b.updated_at
                    .cmp(&a.updated_at)
                    .then_with(|| a.mentor_id.cmp(&b.mentor_id))
            });
            Ok(matching)
        })
    }
}
