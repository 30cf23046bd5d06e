//! Availability Store.
//!
//! Owns mentor-published open slots. Range validation happens here; the overlap rule and
//! the reservation compare-and-swap are single atomic operations of the underlying
//! [`SlotRepository`].

use crate::error::{BookingError, Result};
use crate::metrics;
use crate::stores::{SlotRepository, StoreResult};
use crate::types::{AvailabilitySlot, SlotId, TimeRange, UserId};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;

/// Mentor availability over a [`SlotRepository`].
#[derive(Clone)]
pub struct AvailabilityStore {
    repo: Arc<dyn SlotRepository>,
}

impl AvailabilityStore {
    /// Creates a store backed by `repo`
    #[must_use]
    pub fn new(repo: Arc<dyn SlotRepository>) -> Self {
        Self { repo }
    }

    /// Publish an open slot `[start, end)` for `mentor_id`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidRange`]: `start >= end`
    /// - [`BookingError::Overlap`]: intersects another open slot of the mentor
    pub async fn publish(
        &self,
        mentor_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilitySlot> {
        let range = TimeRange::new(start, end)?;
        let slot = self
            .repo
            .insert_slot(AvailabilitySlot::open(mentor_id, range))
            .await?;

        metrics::record_slot_published();
        tracing::info!(slot_id = %slot.id, mentor_id = %mentor_id, range = %range, "Slot published");
        Ok(slot)
    }

    /// Lazily list a mentor's open slots, ordered by start time.
    ///
    /// With a `window`, only slots starting inside it are returned. The stream is
    /// read-only and a new call restarts the listing.
    #[must_use]
    pub fn list_open(
        &self,
        mentor_id: UserId,
        window: Option<TimeRange>,
    ) -> BoxStream<'_, StoreResult<AvailabilitySlot>> {
        self.repo.open_slots(mentor_id, window)
    }

    /// Fetch one slot.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] if the slot does not exist.
    pub async fn get(&self, slot_id: SlotId) -> Result<AvailabilitySlot> {
        self.repo
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| BookingError::not_found("slot", slot_id))
    }

    /// Atomically mark the slot booked.
    ///
    /// Of any number of concurrent calls for one slot exactly one succeeds.
    ///
    /// # Errors
    ///
    /// - [`BookingError::AlreadyBooked`]: another reservation won
    /// - [`BookingError::NotFound`]: no such slot
    pub async fn reserve(&self, slot_id: SlotId) -> Result<AvailabilitySlot> {
        let slot = self.repo.reserve_slot(slot_id).await?;
        tracing::debug!(slot_id = %slot_id, "Slot reserved");
        Ok(slot)
    }

    /// Undo a reservation whose session was never created.
    ///
    /// # Errors
    ///
    /// Propagates the repository failure; the caller logs it as a failed compensation.
    pub async fn unreserve(&self, slot_id: SlotId) -> Result<AvailabilitySlot> {
        let slot = self.repo.unreserve_slot(slot_id).await?;
        tracing::debug!(slot_id = %slot_id, "Slot reservation released");
        Ok(slot)
    }

    /// Delete an unbooked slot owned by `mentor_id`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`]: no such slot
    /// - [`BookingError::Unauthorized`]: the slot belongs to another mentor
    /// - [`BookingError::SlotInUse`]: the slot is booked
    pub async fn release(&self, slot_id: SlotId, mentor_id: UserId) -> Result<()> {
        let slot = self.get(slot_id).await?;
        if slot.mentor_id != mentor_id {
            return Err(BookingError::Unauthorized {
                actor_id: mentor_id,
                action: "release this slot",
            });
        }
        if slot.is_booked {
            return Err(BookingError::SlotInUse(slot_id));
        }

        self.repo.delete_open_slot(slot_id).await?;
        tracing::info!(slot_id = %slot_id, mentor_id = %mentor_id, "Slot released");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stores::InMemoryBookingStore;
    use chrono::Duration;
    use futures::TryStreamExt;
    use mentorly_testing::test_epoch;
    use proptest::prelude::*;

    fn store() -> AvailabilityStore {
        AvailabilityStore::new(Arc::new(InMemoryBookingStore::new()))
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        test_epoch() + Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn publish_then_list_round_trips() {
        let store = store();
        let mentor = UserId::new();

        let slot = store.publish(mentor, at(600), at(660)).await.unwrap();
        let listed: Vec<_> = store.list_open(mentor, None).try_collect().await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].range.start(), at(600));
        assert_eq!(listed[0].range.end(), at(660));

        store.reserve(slot.id).await.unwrap();
        let listed: Vec<_> = store.list_open(mentor, None).try_collect().await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let result = store().publish(UserId::new(), at(60), at(0)).await;
        assert!(matches!(result, Err(BookingError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn second_reservation_loses() {
        let store = store();
        let slot = store.publish(UserId::new(), at(0), at(60)).await.unwrap();

        store.reserve(slot.id).await.unwrap();
        assert_eq!(
            store.reserve(slot.id).await,
            Err(BookingError::AlreadyBooked(slot.id))
        );
    }

    #[tokio::test]
    async fn release_checks_owner_and_booking() {
        let store = store();
        let mentor = UserId::new();
        let slot = store.publish(mentor, at(0), at(60)).await.unwrap();
        let booked = store.publish(mentor, at(120), at(180)).await.unwrap();
        store.reserve(booked.id).await.unwrap();

        assert!(matches!(
            store.release(slot.id, UserId::new()).await,
            Err(BookingError::Unauthorized { .. })
        ));
        assert_eq!(
            store.release(booked.id, mentor).await,
            Err(BookingError::SlotInUse(booked.id))
        );
        store.release(slot.id, mentor).await.unwrap();
        assert!(matches!(store.get(slot.id).await, Err(BookingError::NotFound { .. })));
    }

    proptest! {
        #[test]
        fn overlapping_open_slots_are_refused(
            a_start in 0i64..1_000,
            a_len in 1i64..240,
            b_start in 0i64..1_000,
            b_len in 1i64..240,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (first, second) = runtime.block_on(async {
                let store = store();
                let mentor = UserId::new();
                let first = store.publish(mentor, at(a_start), at(a_start + a_len)).await;
                let second = store.publish(mentor, at(b_start), at(b_start + b_len)).await;
                (first, second)
            });

            prop_assert!(first.is_ok());
            let overlaps = a_start < b_start + b_len && b_start < a_start + a_len;
            if overlaps {
                let is_overlap = matches!(second, Err(BookingError::Overlap { .. }));
                prop_assert!(is_overlap);
            } else {
                prop_assert!(second.is_ok());
            }
        }
    }
}
