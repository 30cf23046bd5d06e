//! PostgreSQL implementation of all booking repositories.
//!
//! Conditional writes are single `UPDATE ... WHERE <expected state> RETURNING` statements.
//! When such an update matches no row, a follow-up existence check decides between
//! [`StoreError::NotFound`] and [`StoreError::Stale`]. The no-overlap rule for open
//! slots is enforced by an exclusion constraint, so the insert itself is the check.
//!
//! # Example
//!
//! ```no_run
//! use mentorly_booking::config::DatabaseConfig;
//! use mentorly_booking::stores::PostgresBookingStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DatabaseConfig {
//!     url: "postgres://localhost/mentorly".to_string(),
//!     max_connections: 10,
//!     min_connections: 2,
//!     connect_timeout: 30,
//! };
//! let store = PostgresBookingStore::connect(&config).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

use super::{
    NotificationRepository, ProfileRepository, SessionRepository, SlotRepository, StoreFuture,
    StoreResult,
};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::types::{
    AvailabilitySlot, MentorProfile, Money, Notification, NotificationId, NotificationKind,
    Payment, PaymentId, PaymentStatus, ProfileUpdate, Session, SessionId, SessionStatus, SlotId,
    TimeRange, UserId, UserRole, VideoCall, VideoCallId, VideoCallStatus,
};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;

/// `SQLSTATE` raised by an exclusion constraint
const EXCLUSION_VIOLATION: &str = "23P01";

const SESSION_COLUMNS: &str = "id, mentor_id, mentee_id, slot_id, start_time, end_time, status, \
     payment_status, notes, transcript, video_call_ref, payment_ref, created_at, updated_at";

const SLOT_COLUMNS: &str = "id, mentor_id, start_time, end_time, is_booked";

const PROFILE_COLUMNS: &str = "mentor_id, bio, domains, experience_years, hourly_rate_cents, \
     availability_hours, education, company, position, languages, social_links, updated_at";

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, title, message, kind, read, created_at, related_session_id";

/// PostgreSQL booking store.
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool using the database settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(db_err("Failed to connect"))?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if migrations fail.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, table: &'static str, id: uuid::Uuid) -> StoreResult<bool> {
        let (exists,): (bool,) =
            sqlx::query_as(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1)"))
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err("Failed to check existence"))?;
        Ok(exists)
    }

    /// Error for a conditional session update that matched no row.
    async fn session_conflict(&self, session_id: SessionId) -> StoreError {
        match self.exists("sessions", *session_id.as_uuid()).await {
            Ok(true) => StoreError::stale("session", session_id),
            Ok(false) => StoreError::not_found("session", session_id),
            Err(e) => e,
        }
    }

    async fn update_session(
        &self,
        session_id: SessionId,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> StoreResult<Session> {
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to update session"))?;
        match row {
            Some(row) => session_from_row(&row),
            None => Err(self.session_conflict(session_id).await),
        }
    }
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| StoreError::Database(format!("{context}: {e}"))
}

fn is_exclusion_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == EXCLUSION_VIOLATION)
}

fn cents_to_db(amount: Money) -> StoreResult<i64> {
    i64::try_from(amount.cents())
        .map_err(|e| StoreError::Database(format!("Amount out of range: {e}")))
}

fn range_from_row(row: &PgRow) -> StoreResult<TimeRange> {
    let start: DateTime<Utc> = row.try_get("start_time").map_err(db_err("start_time"))?;
    let end: DateTime<Utc> = row.try_get("end_time").map_err(db_err("end_time"))?;
    TimeRange::new(start, end).map_err(|e| StoreError::Database(e.to_string()))
}

fn slot_from_row(row: &PgRow) -> StoreResult<AvailabilitySlot> {
    Ok(AvailabilitySlot {
        id: SlotId::from_uuid(row.try_get("id").map_err(db_err("id"))?),
        mentor_id: UserId::from_uuid(row.try_get("mentor_id").map_err(db_err("mentor_id"))?),
        range: range_from_row(row)?,
        is_booked: row.try_get("is_booked").map_err(db_err("is_booked"))?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    let status: String = row.try_get("status").map_err(db_err("status"))?;
    let payment_status: String = row
        .try_get("payment_status")
        .map_err(db_err("payment_status"))?;
    let payment_ref: Option<uuid::Uuid> =
        row.try_get("payment_ref").map_err(db_err("payment_ref"))?;

    Ok(Session {
        id: SessionId::from_uuid(row.try_get("id").map_err(db_err("id"))?),
        mentor_id: UserId::from_uuid(row.try_get("mentor_id").map_err(db_err("mentor_id"))?),
        mentee_id: UserId::from_uuid(row.try_get("mentee_id").map_err(db_err("mentee_id"))?),
        slot_id: SlotId::from_uuid(row.try_get("slot_id").map_err(db_err("slot_id"))?),
        range: range_from_row(row)?,
        status: SessionStatus::parse(&status)?,
        payment_status: PaymentStatus::parse(&payment_status)?,
        notes: row.try_get("notes").map_err(db_err("notes"))?,
        transcript: row.try_get("transcript").map_err(db_err("transcript"))?,
        video_call_ref: row.try_get("video_call_ref").map_err(db_err("video_call_ref"))?,
        payment_ref: payment_ref.map(PaymentId::from_uuid),
        created_at: row.try_get("created_at").map_err(db_err("created_at"))?,
        updated_at: row.try_get("updated_at").map_err(db_err("updated_at"))?,
    })
}

fn payment_from_row(row: &PgRow) -> StoreResult<Payment> {
    let amount_cents: i64 = row.try_get("amount_cents").map_err(db_err("amount_cents"))?;
    let method: serde_json::Value = row.try_get("method").map_err(db_err("method"))?;
    let status: String = row.try_get("status").map_err(db_err("status"))?;

    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id").map_err(db_err("id"))?),
        session_id: SessionId::from_uuid(row.try_get("session_id").map_err(db_err("session_id"))?),
        amount: Money::from_cents(
            u64::try_from(amount_cents)
                .map_err(|e| StoreError::Database(format!("Negative amount: {e}")))?,
        ),
        method: serde_json::from_value(method)
            .map_err(|e| StoreError::Database(format!("Invalid payment method: {e}")))?,
        status: PaymentStatus::parse(&status)?,
        transaction_ref: row
            .try_get("transaction_ref")
            .map_err(db_err("transaction_ref"))?,
        processed_at: row.try_get("processed_at").map_err(db_err("processed_at"))?,
    })
}

fn video_call_from_row(row: &PgRow) -> StoreResult<VideoCall> {
    let status: String = row.try_get("status").map_err(db_err("status"))?;
    Ok(VideoCall {
        id: VideoCallId::from_uuid(row.try_get("id").map_err(db_err("id"))?),
        session_id: SessionId::from_uuid(row.try_get("session_id").map_err(db_err("session_id"))?),
        call_ref: row.try_get("call_ref").map_err(db_err("call_ref"))?,
        status: VideoCallStatus::parse(&status)?,
        recording_url: row.try_get("recording_url").map_err(db_err("recording_url"))?,
        started_at: row.try_get("started_at").map_err(db_err("started_at"))?,
        ended_at: row.try_get("ended_at").map_err(db_err("ended_at"))?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &PgRow, column: &'static str) -> StoreResult<T> {
    let value: serde_json::Value = row.try_get(column).map_err(db_err(column))?;
    serde_json::from_value(value)
        .map_err(|e| StoreError::Database(format!("Invalid {column}: {e}")))
}

fn profile_from_row(row: &PgRow) -> StoreResult<MentorProfile> {
    let experience_years: Option<i32> =
        row.try_get("experience_years").map_err(db_err("experience_years"))?;
    let hourly_rate_cents: Option<i64> =
        row.try_get("hourly_rate_cents").map_err(db_err("hourly_rate_cents"))?;

    Ok(MentorProfile {
        mentor_id: UserId::from_uuid(row.try_get("mentor_id").map_err(db_err("mentor_id"))?),
        bio: row.try_get("bio").map_err(db_err("bio"))?,
        domains: row.try_get("domains").map_err(db_err("domains"))?,
        experience_years: experience_years
            .map(u32::try_from)
            .transpose()
            .map_err(|e| StoreError::Database(format!("Negative experience: {e}")))?,
        hourly_rate: hourly_rate_cents
            .map(u64::try_from)
            .transpose()
            .map_err(|e| StoreError::Database(format!("Negative hourly rate: {e}")))?
            .map(Money::from_cents),
        availability_hours: json_column(row, "availability_hours")?,
        education: row.try_get("education").map_err(db_err("education"))?,
        company: row.try_get("company").map_err(db_err("company"))?,
        position: row.try_get("position").map_err(db_err("position"))?,
        languages: row.try_get("languages").map_err(db_err("languages"))?,
        social_links: json_column(row, "social_links")?,
        updated_at: row.try_get("updated_at").map_err(db_err("updated_at"))?,
    })
}

fn notification_from_row(row: &PgRow) -> StoreResult<Notification> {
    let kind: String = row.try_get("kind").map_err(db_err("kind"))?;
    let related: Option<uuid::Uuid> = row
        .try_get("related_session_id")
        .map_err(db_err("related_session_id"))?;

    Ok(Notification {
        id: NotificationId::from_uuid(row.try_get("id").map_err(db_err("id"))?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(db_err("user_id"))?),
        title: row.try_get("title").map_err(db_err("title"))?,
        message: row.try_get("message").map_err(db_err("message"))?,
        kind: NotificationKind::parse(&kind)?,
        read: row.try_get("read").map_err(db_err("read"))?,
        created_at: row.try_get("created_at").map_err(db_err("created_at"))?,
        related_session_id: related.map(SessionId::from_uuid),
    })
}

impl SlotRepository for PostgresBookingStore {
    fn insert_slot(&self, slot: AvailabilitySlot) -> StoreFuture<'_, AvailabilitySlot> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO availabilities (id, mentor_id, start_time, end_time, is_booked)
                 VALUES ($1, $2, $3, $4, FALSE)",
            )
            .bind(slot.id.as_uuid())
            .bind(slot.mentor_id.as_uuid())
            .bind(slot.range.start())
            .bind(slot.range.end())
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(slot),
                Err(e) if is_exclusion_violation(&e) => Err(StoreError::Overlap {
                    mentor_id: slot.mentor_id,
                    start: slot.range.start(),
                    end: slot.range.end(),
                }),
                Err(e) => Err(db_err("Failed to insert slot")(e)),
            }
        })
    }

    fn get_slot(&self, slot_id: SlotId) -> StoreFuture<'_, Option<AvailabilitySlot>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {SLOT_COLUMNS} FROM availabilities WHERE id = $1"
            ))
            .bind(slot_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load slot"))?;
            row.as_ref().map(slot_from_row).transpose()
        })
    }

    fn open_slots(
        &self,
        mentor_id: UserId,
        window: Option<TimeRange>,
    ) -> BoxStream<'_, StoreResult<AvailabilitySlot>> {
        sqlx::query(
            "SELECT id, mentor_id, start_time, end_time, is_booked
             FROM availabilities
             WHERE mentor_id = $1
               AND NOT is_booked
               AND ($2::timestamptz IS NULL OR (start_time >= $2 AND start_time < $3))
             ORDER BY start_time ASC",
        )
        .bind(*mentor_id.as_uuid())
        .bind(window.map(|w| w.start()))
        .bind(window.map(|w| w.end()))
        .fetch(&self.pool)
        .map(|row| {
            row.map_err(db_err("Failed to list open slots"))
                .and_then(|row| slot_from_row(&row))
        })
        .boxed()
    }

    fn reserve_slot(&self, slot_id: SlotId) -> StoreFuture<'_, AvailabilitySlot> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE availabilities SET is_booked = TRUE
                 WHERE id = $1 AND NOT is_booked
                 RETURNING {SLOT_COLUMNS}"
            ))
            .bind(slot_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to reserve slot"))?;

            match row {
                Some(row) => slot_from_row(&row),
                None if self.exists("availabilities", *slot_id.as_uuid()).await? => {
                    Err(StoreError::AlreadyBooked(slot_id))
                },
                None => Err(StoreError::not_found("slot", slot_id)),
            }
        })
    }

    fn unreserve_slot(&self, slot_id: SlotId) -> StoreFuture<'_, AvailabilitySlot> {
        Box::pin(async move {
            let result = sqlx::query(&format!(
                "UPDATE availabilities SET is_booked = FALSE
                 WHERE id = $1 AND is_booked
                 RETURNING {SLOT_COLUMNS}"
            ))
            .bind(slot_id.as_uuid())
            .fetch_optional(&self.pool)
            .await;

            match result {
                Ok(Some(row)) => slot_from_row(&row),
                Ok(None) if self.exists("availabilities", *slot_id.as_uuid()).await? => {
                    Err(StoreError::stale("slot", slot_id))
                },
                Ok(None) => Err(StoreError::not_found("slot", slot_id)),
                Err(e) if is_exclusion_violation(&e) => {
                    let slot = self
                        .get_slot(slot_id)
                        .await?
                        .ok_or_else(|| StoreError::not_found("slot", slot_id))?;
                    Err(StoreError::Overlap {
                        mentor_id: slot.mentor_id,
                        start: slot.range.start(),
                        end: slot.range.end(),
                    })
                },
                Err(e) => Err(db_err("Failed to release reservation")(e)),
            }
        })
    }

    fn delete_open_slot(&self, slot_id: SlotId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let deleted = sqlx::query("DELETE FROM availabilities WHERE id = $1 AND NOT is_booked")
                .bind(slot_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_err("Failed to delete slot"))?
                .rows_affected();

            if deleted == 1 {
                Ok(())
            } else if self.exists("availabilities", *slot_id.as_uuid()).await? {
                Err(StoreError::SlotInUse(slot_id))
            } else {
                Err(StoreError::not_found("slot", slot_id))
            }
        })
    }
}

impl SessionRepository for PostgresBookingStore {
    fn insert_session(&self, session: Session) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            sqlx::query(&format!(
                "INSERT INTO sessions ({SESSION_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ))
            .bind(session.id.as_uuid())
            .bind(session.mentor_id.as_uuid())
            .bind(session.mentee_id.as_uuid())
            .bind(session.slot_id.as_uuid())
            .bind(session.range.start())
            .bind(session.range.end())
            .bind(session.status.as_str())
            .bind(session.payment_status.as_str())
            .bind(session.notes.as_deref())
            .bind(session.transcript.as_deref())
            .bind(session.video_call_ref.as_deref())
            .bind(session.payment_ref.map(|id| *id.as_uuid()))
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to insert session"))?;
            Ok(session)
        })
    }

    fn get_session(&self, session_id: SessionId) -> StoreFuture<'_, Option<Session>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
            ))
            .bind(session_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load session"))?;
            row.as_ref().map(session_from_row).transpose()
        })
    }

    fn sessions_for(&self, user_id: UserId, role: UserRole) -> StoreFuture<'_, Vec<Session>> {
        Box::pin(async move {
            let column = match role {
                UserRole::Mentor => "mentor_id",
                UserRole::Mentee => "mentee_id",
            };
            let rows = sqlx::query(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE {column} = $1
                 ORDER BY start_time DESC"
            ))
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list sessions"))?;
            rows.iter().map(session_from_row).collect()
        })
    }

    fn transition_status(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE sessions SET status = $3, updated_at = $4
                 WHERE id = $1 AND status = $2
                 RETURNING {SESSION_COLUMNS}"
            );
            let query = sqlx::query(&sql)
                .bind(*session_id.as_uuid())
                .bind(from.as_str())
                .bind(to.as_str())
                .bind(at);
            self.update_session(session_id, query).await
        })
    }

    fn complete_payment(&self, payment: Payment, at: DateTime<Utc>) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let method = serde_json::to_value(&payment.method)
                .map_err(|e| StoreError::Database(format!("Invalid payment method: {e}")))?;
            let amount = cents_to_db(payment.amount)?;

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(db_err("Failed to begin transaction"))?;

            let row = sqlx::query(&format!(
                "UPDATE sessions
                 SET payment_status = 'completed', payment_ref = $2, updated_at = $3
                 WHERE id = $1
                   AND payment_status = 'pending'
                   AND status IN ('requested', 'confirmed')
                 RETURNING {SESSION_COLUMNS}"
            ))
            .bind(payment.session_id.as_uuid())
            .bind(payment.id.as_uuid())
            .bind(at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("Failed to complete payment"))?;

            let Some(row) = row else {
                tx.rollback()
                    .await
                    .map_err(db_err("Failed to roll back transaction"))?;
                return Err(self.session_conflict(payment.session_id).await);
            };

            sqlx::query(
                "INSERT INTO payments
                     (id, session_id, amount_cents, method, status, transaction_ref, processed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(payment.id.as_uuid())
            .bind(payment.session_id.as_uuid())
            .bind(amount)
            .bind(method)
            .bind(payment.status.as_str())
            .bind(&payment.transaction_ref)
            .bind(payment.processed_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to insert payment"))?;

            tx.commit()
                .await
                .map_err(db_err("Failed to commit payment"))?;
            session_from_row(&row)
        })
    }

    fn claim_refund(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        abandoned_before: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE sessions SET refund_claimed_at = $2
                 WHERE id = $1
                   AND payment_status = 'completed'
                   AND (refund_claimed_at IS NULL OR refund_claimed_at < $3)
                 RETURNING {SESSION_COLUMNS}"
            );
            let query = sqlx::query(&sql)
                .bind(*session_id.as_uuid())
                .bind(at)
                .bind(abandoned_before);
            self.update_session(session_id, query).await
        })
    }

    fn release_refund_claim(&self, session_id: SessionId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE sessions SET refund_claimed_at = NULL WHERE id = $1")
                .bind(session_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_err("Failed to release refund claim"))?;
            Ok(())
        })
    }

    fn refund_payment(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(db_err("Failed to begin transaction"))?;

            let row = sqlx::query(&format!(
                "UPDATE sessions
                 SET payment_status = 'refunded', refund_claimed_at = NULL, updated_at = $2
                 WHERE id = $1 AND payment_status = 'completed'
                 RETURNING {SESSION_COLUMNS}"
            ))
            .bind(session_id.as_uuid())
            .bind(at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("Failed to refund payment"))?;

            let Some(row) = row else {
                tx.rollback()
                    .await
                    .map_err(db_err("Failed to roll back transaction"))?;
                return Err(self.session_conflict(session_id).await);
            };
            let session = session_from_row(&row)?;

            if let Some(payment_id) = session.payment_ref {
                sqlx::query("UPDATE payments SET status = 'refunded' WHERE id = $1")
                    .bind(payment_id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err("Failed to update payment"))?;
            }

            tx.commit()
                .await
                .map_err(db_err("Failed to commit refund"))?;
            Ok(session)
        })
    }

    fn get_payment(&self, payment_id: PaymentId) -> StoreFuture<'_, Option<Payment>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, session_id, amount_cents, method, status, transaction_ref, processed_at
                 FROM payments WHERE id = $1",
            )
            .bind(payment_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load payment"))?;
            row.as_ref().map(payment_from_row).transpose()
        })
    }

    fn update_notes(
        &self,
        session_id: SessionId,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE sessions SET notes = $2, updated_at = $3
                 WHERE id = $1
                 RETURNING {SESSION_COLUMNS}"
            );
            let query = sqlx::query(&sql)
                .bind(*session_id.as_uuid())
                .bind(notes)
                .bind(at);
            self.update_session(session_id, query).await
        })
    }

    fn update_transcript(
        &self,
        session_id: SessionId,
        transcript: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE sessions SET transcript = $2, updated_at = $3
                 WHERE id = $1
                 RETURNING {SESSION_COLUMNS}"
            );
            let query = sqlx::query(&sql)
                .bind(*session_id.as_uuid())
                .bind(transcript)
                .bind(at);
            self.update_session(session_id, query).await
        })
    }

    fn link_video_call(
        &self,
        session_id: SessionId,
        call_ref: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE sessions SET video_call_ref = $2, updated_at = $3
                 WHERE id = $1 AND (video_call_ref IS NULL OR video_call_ref = $2)
                 RETURNING {SESSION_COLUMNS}"
            );
            let query = sqlx::query(&sql)
                .bind(*session_id.as_uuid())
                .bind(call_ref)
                .bind(at);
            self.update_session(session_id, query).await
        })
    }

    fn save_video_call(&self, call: VideoCall) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO video_calls
                     (id, session_id, call_ref, status, recording_url, started_at, ended_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (session_id) DO UPDATE SET
                     call_ref = EXCLUDED.call_ref,
                     status = EXCLUDED.status,
                     recording_url = EXCLUDED.recording_url,
                     started_at = EXCLUDED.started_at,
                     ended_at = EXCLUDED.ended_at",
            )
            .bind(call.id.as_uuid())
            .bind(call.session_id.as_uuid())
            .bind(&call.call_ref)
            .bind(call.status.as_str())
            .bind(call.recording_url.as_deref())
            .bind(call.started_at)
            .bind(call.ended_at)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to save video call"))?;
            Ok(())
        })
    }

    fn video_call_for(&self, session_id: SessionId) -> StoreFuture<'_, Option<VideoCall>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, session_id, call_ref, status, recording_url, started_at, ended_at
                 FROM video_calls WHERE session_id = $1",
            )
            .bind(session_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load video call"))?;
            row.as_ref().map(video_call_from_row).transpose()
        })
    }
}

impl NotificationRepository for PostgresBookingStore {
    fn insert_notification(&self, notification: Notification) -> StoreFuture<'_, Notification> {
        Box::pin(async move {
            sqlx::query(&format!(
                "INSERT INTO notifications ({NOTIFICATION_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            ))
            .bind(notification.id.as_uuid())
            .bind(notification.user_id.as_uuid())
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(notification.kind.as_str())
            .bind(notification.read)
            .bind(notification.created_at)
            .bind(notification.related_session_id.map(|id| *id.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to insert notification"))?;
            Ok(notification)
        })
    }

    fn get_notification(
        &self,
        notification_id: NotificationId,
    ) -> StoreFuture<'_, Option<Notification>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
            ))
            .bind(notification_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load notification"))?;
            row.as_ref().map(notification_from_row).transpose()
        })
    }

    fn notifications_for(&self, user_id: UserId) -> StoreFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = $1
                 ORDER BY created_at DESC"
            ))
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list notifications"))?;
            rows.iter().map(notification_from_row).collect()
        })
    }

    fn unread_count(&self, user_id: UserId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT read",
            )
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to count notifications"))?;
            u64::try_from(count).map_err(|e| StoreError::Database(format!("Invalid count: {e}")))
        })
    }

    fn mark_read(&self, notification_id: NotificationId) -> StoreFuture<'_, Notification> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE notifications SET read = TRUE WHERE id = $1
                 RETURNING {NOTIFICATION_COLUMNS}"
            ))
            .bind(notification_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to mark notification read"))?;
            match row {
                Some(row) => notification_from_row(&row),
                None => Err(StoreError::not_found("notification", notification_id)),
            }
        })
    }
}

impl ProfileRepository for PostgresBookingStore {
    fn get_profile(&self, mentor_id: UserId) -> StoreFuture<'_, Option<MentorProfile>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {PROFILE_COLUMNS} FROM mentor_profiles WHERE mentor_id = $1"
            ))
            .bind(mentor_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load profile"))?;
            row.as_ref().map(profile_from_row).transpose()
        })
    }

    fn upsert_profile(
        &self,
        mentor_id: UserId,
        update: ProfileUpdate,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, MentorProfile> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(db_err("Failed to begin transaction"))?;

            // Create the row first so the lock below always has something to hold
            sqlx::query(
                "INSERT INTO mentor_profiles (mentor_id, updated_at) VALUES ($1, $2)
                 ON CONFLICT (mentor_id) DO NOTHING",
            )
            .bind(mentor_id.as_uuid())
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to create profile"))?;

            let row = sqlx::query(&format!(
                "SELECT {PROFILE_COLUMNS} FROM mentor_profiles WHERE mentor_id = $1 FOR UPDATE"
            ))
            .bind(mentor_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to lock profile"))?;
            let mut profile = profile_from_row(&row)?;
            update.apply_to(&mut profile, at);

            let experience_years = profile
                .experience_years
                .map(i32::try_from)
                .transpose()
                .map_err(|e| StoreError::Database(format!("Experience out of range: {e}")))?;
            let hourly_rate = profile.hourly_rate.map(cents_to_db).transpose()?;
            let availability_hours = serde_json::to_value(&profile.availability_hours)
                .map_err(|e| StoreError::Database(format!("Invalid availability hours: {e}")))?;
            let social_links = serde_json::to_value(&profile.social_links)
                .map_err(|e| StoreError::Database(format!("Invalid social links: {e}")))?;

            sqlx::query(
                "UPDATE mentor_profiles
                 SET bio = $2, domains = $3, experience_years = $4, hourly_rate_cents = $5,
                     availability_hours = $6, education = $7, company = $8, position = $9,
                     languages = $10, social_links = $11, updated_at = $12
                 WHERE mentor_id = $1",
            )
            .bind(mentor_id.as_uuid())
            .bind(&profile.bio)
            .bind(&profile.domains)
            .bind(experience_years)
            .bind(hourly_rate)
            .bind(availability_hours)
            .bind(&profile.education)
            .bind(&profile.company)
            .bind(&profile.position)
            .bind(&profile.languages)
            .bind(social_links)
            .bind(profile.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to update profile"))?;

            tx.commit()
                .await
                .map_err(db_err("Failed to commit profile"))?;
            Ok(profile)
        })
    }

    fn profiles_in_domain(&self, domain: Option<String>) -> StoreFuture<'_, Vec<MentorProfile>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {PROFILE_COLUMNS} FROM mentor_profiles
                 WHERE $1::TEXT IS NULL OR domains @> ARRAY[$1::TEXT]
                 ORDER BY updated_at DESC, mentor_id"
            ))
            .bind(domain)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list profiles"))?;
            rows.iter().map(profile_from_row).collect()
        })
    }
}
