//! Mentor profiles and the mentor directory.

use super::orchestrator::BookingOrchestrator;
use crate::error::{BookingError, Result, StoreError};
use crate::metrics;
use crate::types::{MentorListing, MentorProfile, ProfileUpdate, UserId};
use futures::TryStreamExt;
use futures::future::{self, try_join_all};

impl BookingOrchestrator {
    /// A mentor's profile, `None` if they never filled one in.
    ///
    /// # Errors
    ///
    /// [`BookingError::Storage`] on repository failure.
    pub async fn mentor_profile(&self, mentor_id: UserId) -> Result<Option<MentorProfile>> {
        Ok(self.profiles.get_profile(mentor_id).await?)
    }

    /// Create or partially update the profile of `mentor_id`.
    ///
    /// Fields left `None` in `update` keep their stored value.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`]: blank tag or implausible experience
    /// - [`BookingError::Storage`]: repository failure
    #[tracing::instrument(skip(self, update))]
    pub async fn upsert_mentor_profile(
        &self,
        mentor_id: UserId,
        update: ProfileUpdate,
    ) -> Result<MentorProfile> {
        let update = update.validated()?;
        let profile = self
            .profiles
            .upsert_profile(mentor_id, update, self.clock.now())
            .await?;
        metrics::record_profile_update();
        tracing::info!(
            mentor_id = %mentor_id,
            domains = ?profile.domains,
            "Mentor profile saved"
        );
        Ok(profile)
    }

    /// Mentors listing `domain` (any mentor with a profile for `None`), each with the
    /// number of open slots that have not started yet.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for a blank domain, [`BookingError::Storage`] on
    /// repository failure.
    pub async fn mentors_in_domain(&self, domain: Option<&str>) -> Result<Vec<MentorListing>> {
        let domain = match domain.map(|d| d.trim().to_lowercase()) {
            Some(d) if d.is_empty() => {
                return Err(BookingError::Validation("domain must not be blank".to_string()));
            },
            other => other,
        };
        let profiles = self.profiles.profiles_in_domain(domain).await?;

        let now = self.clock.now();
        let listings = profiles.into_iter().map(move |profile| async move {
            let open_slots = self
                .availability
                .list_open(profile.mentor_id, None)
                .try_filter(|slot| future::ready(slot.range.start() >= now))
                .try_fold(0_usize, |count, _| future::ready(Ok::<_, StoreError>(count + 1)))
                .await?;
            Ok::<_, BookingError>(MentorListing {
                profile,
                open_slots,
            })
        });
        try_join_all(listings).await
    }
}
