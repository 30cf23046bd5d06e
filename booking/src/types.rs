//! Domain types for the booking engine.
//!
//! Identifiers, value objects and the three persisted entities (availability slots,
//! sessions, notifications) together with the payment and video-call records that hang
//! off a session, and the mentor profiles mentees browse before booking.

use crate::error::{BookingError, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a user (mentor or mentee) as issued by the identity provider
    UserId
);
define_id!(
    /// Unique identifier for an availability slot
    SlotId
);
define_id!(
    /// Unique identifier for a session
    SessionId
);
define_id!(
    /// Unique identifier for a notification
    NotificationId
);
define_id!(
    /// Unique identifier for a payment record
    PaymentId
);
define_id!(
    /// Unique identifier for a video call record
    VideoCallId
);

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Amount of money in cents
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole dollars, `None` on overflow
    #[must_use]
    pub const fn checked_from_dollars(dollars: u64) -> Option<Self> {
        match dollars.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Time range
// ============================================================================

/// A validated `[start, end)` interval with `start < end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = BookingError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl TimeRange {
    /// Build a range.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidRange`] if `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, BookingError> {
        if start >= end {
            return Err(BookingError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Inclusive start
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Length of the range
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open overlap: ranges that only touch at an endpoint do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Closed containment `start <= instant <= end`, used by the live-session gate.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// True when the range starts inside `window` (used to filter slot listings).
    #[must_use]
    pub fn starts_within(&self, window: &Self) -> bool {
        window.start <= self.start && self.start < window.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

// ============================================================================
// Users
// ============================================================================

/// Which side of a session a user is on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Publishes availability and accepts or declines requests
    Mentor,
    /// Books sessions and pays for them
    Mentee,
}

impl UserRole {
    /// Database/wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mentor => "mentor",
            Self::Mentee => "mentee",
        }
    }
}

// ============================================================================
// Availability
// ============================================================================

/// A mentor-published bookable interval
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    /// Slot identifier
    pub id: SlotId,
    /// Owning mentor
    pub mentor_id: UserId,
    /// When the slot takes place
    pub range: TimeRange,
    /// Set once a booking consumed the slot; never cleared by a booking flow
    pub is_booked: bool,
}

impl AvailabilitySlot {
    /// A fresh, unbooked slot
    #[must_use]
    pub fn open(mentor_id: UserId, range: TimeRange) -> Self {
        Self {
            id: SlotId::new(),
            mentor_id,
            range,
            is_booked: false,
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Lifecycle status of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Waiting for the mentor's answer
    Requested,
    /// Accepted by the mentor
    Confirmed,
    /// Rejected by the mentor (terminal)
    Declined,
    /// Took place (terminal)
    Completed,
    /// Called off by a participant (terminal)
    Cancelled,
}

impl SessionStatus {
    /// Terminal statuses accept no further transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Completed | Self::Cancelled)
    }

    /// Database/wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Confirmed => "confirmed",
            Self::Declined => "declined",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "requested" => Ok(Self::Requested),
            "confirmed" => Ok(Self::Confirmed),
            "declined" => Ok(Self::Declined),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::Database(format!("Invalid session status: {s}"))),
        }
    }

    /// Status reached by applying `trigger`, or `None` if the transition is illegal.
    #[must_use]
    pub const fn apply(self, trigger: SessionTrigger) -> Option<Self> {
        match (self, trigger) {
            (Self::Requested, SessionTrigger::Accept) => Some(Self::Confirmed),
            (Self::Requested, SessionTrigger::Decline) => Some(Self::Declined),
            (Self::Confirmed, SessionTrigger::Cancel) => Some(Self::Cancelled),
            (Self::Confirmed, SessionTrigger::Complete) => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that moves a session from one status to another
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTrigger {
    /// Mentor accepts a request
    Accept,
    /// Mentor declines a request
    Decline,
    /// Either participant cancels a confirmed session
    Cancel,
    /// The session ended
    Complete,
}

impl SessionTrigger {
    /// Verb used in logs and error messages
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for SessionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mentor's answer to a booking request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Confirm the session
    Accept,
    /// Turn the request down
    Decline,
}

impl Decision {
    /// The transition this decision drives
    #[must_use]
    pub const fn trigger(self) -> SessionTrigger {
        match self {
            Self::Accept => SessionTrigger::Accept,
            Self::Decline => SessionTrigger::Decline,
        }
    }
}

/// Payment status tracked on the session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Not paid yet
    Pending,
    /// Charged successfully
    Completed,
    /// Money returned to the mentee
    Refunded,
}

impl PaymentStatus {
    /// Database/wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse payment status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(StoreError::Database(format!("Invalid payment status: {s}"))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mentor–mentee booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub id: SessionId,
    /// Mentor running the session
    pub mentor_id: UserId,
    /// Mentee who booked it
    pub mentee_id: UserId,
    /// Slot the session was booked from
    pub slot_id: SlotId,
    /// Copied from the slot at creation, never changed afterwards
    pub range: TimeRange,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Free-form notes
    pub notes: Option<String>,
    /// Call transcript
    pub transcript: Option<String>,
    /// Room reference at the video provider
    pub video_call_ref: Option<String>,
    /// Completed payment record
    pub payment_ref: Option<PaymentId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Whether `user_id` is the mentor or the mentee of this session
    #[must_use]
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.role_of(user_id).is_some()
    }

    /// Role `user_id` plays in this session
    #[must_use]
    pub fn role_of(&self, user_id: UserId) -> Option<UserRole> {
        if user_id == self.mentor_id {
            Some(UserRole::Mentor)
        } else if user_id == self.mentee_id {
            Some(UserRole::Mentee)
        } else {
            None
        }
    }
}

/// Why the live-session gate refused access
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum AccessDenial {
    /// Session is not confirmed
    #[error("session is {0}, not confirmed")]
    NotConfirmed(SessionStatus),
    /// Payment has not completed
    #[error("payment is {0}")]
    PaymentIncomplete(PaymentStatus),
    /// Current time is outside the session window
    #[error("outside the scheduled time window")]
    OutsideWindow,
}

// ============================================================================
// Notifications
// ============================================================================

/// Notification type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    /// New booking request (to the mentor)
    Request,
    /// Request accepted (to the mentee)
    Confirmation,
    /// Upcoming session (to both)
    Reminder,
    /// Session declined or cancelled (to the mentee)
    Summary,
    /// Session completed (to the mentor)
    FollowUp,
}

impl NotificationKind {
    /// Database/wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Confirmation => "confirmation",
            Self::Reminder => "reminder",
            Self::Summary => "summary",
            Self::FollowUp => "follow-up",
        }
    }

    /// Parse notification type from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known type.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "request" => Ok(Self::Request),
            "confirmation" => Ok(Self::Confirmation),
            "reminder" => Ok(Self::Reminder),
            "summary" => Ok(Self::Summary),
            "follow-up" => Ok(Self::FollowUp),
            _ => Err(StoreError::Database(format!("Invalid notification type: {s}"))),
        }
    }

    /// Fixed type → recipient mapping.
    #[must_use]
    pub fn recipients(&self, session: &Session) -> SmallVec<[UserId; 2]> {
        match self {
            Self::Request | Self::FollowUp => smallvec![session.mentor_id],
            Self::Confirmation | Self::Summary => smallvec![session.mentee_id],
            Self::Reminder => smallvec![session.mentor_id, session.mentee_id],
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message addressed to one user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification identifier
    pub id: NotificationId,
    /// Recipient
    pub user_id: UserId,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Notification type
    pub kind: NotificationKind,
    /// Set by the recipient
    pub read: bool,
    /// When it was created
    pub created_at: DateTime<Utc>,
    /// Session that caused it
    pub related_session_id: Option<SessionId>,
}

// ============================================================================
// Payments
// ============================================================================

/// Payment method
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Credit card payment
    CreditCard {
        /// Last four digits of card
        last_four: String,
    },
    /// `PayPal` payment
    PayPal {
        /// `PayPal` email
        email: String,
    },
}

/// A completed (and possibly later refunded) charge for a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment identifier
    pub id: PaymentId,
    /// Session paid for
    pub session_id: SessionId,
    /// Amount charged
    pub amount: Money,
    /// Method used
    pub method: PaymentMethod,
    /// Mirrors the session's payment status
    pub status: PaymentStatus,
    /// Processor transaction reference
    pub transaction_ref: String,
    /// When the charge went through
    pub processed_at: DateTime<Utc>,
}

// ============================================================================
// Video calls
// ============================================================================

/// Status of a video call record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCallStatus {
    /// Created, nobody joined yet
    Pending,
    /// At least one participant joined
    Started,
    /// Call is over
    Ended,
}

impl VideoCallStatus {
    /// Database/wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Ended => "ended",
        }
    }

    /// Parse call status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "ended" => Ok(Self::Ended),
            _ => Err(StoreError::Database(format!("Invalid video call status: {s}"))),
        }
    }
}

/// Video call attached to a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCall {
    /// Record identifier
    pub id: VideoCallId,
    /// Session the call belongs to
    pub session_id: SessionId,
    /// Room reference at the video provider
    pub call_ref: String,
    /// Call status
    pub status: VideoCallStatus,
    /// Recording location, if the provider produced one
    pub recording_url: Option<String>,
    /// First join
    pub started_at: Option<DateTime<Utc>>,
    /// When the call ended
    pub ended_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Mentor profiles
// ============================================================================

/// Longest career a profile may claim
pub const MAX_EXPERIENCE_YEARS: u32 = 80;

/// Public links shown on a mentor profile
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    /// LinkedIn profile
    pub linkedin: Option<String>,
    /// GitHub profile
    pub github: Option<String>,
    /// Twitter/X handle
    pub twitter: Option<String>,
    /// Personal site
    pub website: Option<String>,
}

/// What a mentor tells mentees about themselves.
///
/// Mentors are bookable without one, so lookups return `Option<MentorProfile>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentorProfile {
    /// Mentor the profile belongs to
    pub mentor_id: UserId,
    /// Free-text introduction
    pub bio: Option<String>,
    /// Expertise tags, lowercase and unique
    pub domains: Vec<String>,
    /// Years of professional experience
    pub experience_years: Option<u32>,
    /// Advertised price per hour
    pub hourly_rate: Option<Money>,
    /// Weekday to free-form hour ranges, e.g. `"monday" -> ["09:00-12:00"]`
    pub availability_hours: BTreeMap<String, Vec<String>>,
    /// Education summary
    pub education: Option<String>,
    /// Current employer
    pub company: Option<String>,
    /// Current role
    pub position: Option<String>,
    /// Spoken languages, lowercase and unique
    pub languages: Vec<String>,
    /// Public links
    pub social_links: SocialLinks,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl MentorProfile {
    /// A profile with nothing filled in yet
    #[must_use]
    pub fn empty(mentor_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            mentor_id,
            bio: None,
            domains: Vec::new(),
            experience_years: None,
            hourly_rate: None,
            availability_hours: BTreeMap::new(),
            education: None,
            company: None,
            position: None,
            languages: Vec::new(),
            social_links: SocialLinks::default(),
            updated_at: at,
        }
    }

    /// Whether the mentor lists `domain`, ignoring case and surrounding whitespace
    #[must_use]
    pub fn covers(&self, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        self.domains.iter().any(|d| *d == domain)
    }
}

/// Partial profile change; `None` leaves the field as it is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    /// New introduction; an empty string clears it
    pub bio: Option<String>,
    /// Replacement expertise tags
    pub domains: Option<Vec<String>>,
    /// Years of experience
    pub experience_years: Option<u32>,
    /// Price per hour
    pub hourly_rate: Option<Money>,
    /// Replacement weekly hours
    pub availability_hours: Option<BTreeMap<String, Vec<String>>>,
    /// Education summary; an empty string clears it
    pub education: Option<String>,
    /// Employer; an empty string clears it
    pub company: Option<String>,
    /// Role; an empty string clears it
    pub position: Option<String>,
    /// Replacement languages
    pub languages: Option<Vec<String>>,
    /// Replacement links
    pub social_links: Option<SocialLinks>,
}

impl ProfileUpdate {
    /// Check and normalise the update: tags are trimmed, lowercased and deduplicated.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for a blank tag or an implausible experience claim.
    pub fn validated(mut self) -> Result<Self, BookingError> {
        if let Some(years) = self.experience_years {
            if years > MAX_EXPERIENCE_YEARS {
                return Err(BookingError::Validation(format!(
                    "experience_years must be at most {MAX_EXPERIENCE_YEARS}, got {years}"
                )));
            }
        }
        self.domains = self.domains.map(|tags| normalize_tags("domain", tags)).transpose()?;
        self.languages = self
            .languages
            .map(|tags| normalize_tags("language", tags))
            .transpose()?;
        Ok(self)
    }

    /// Write every provided field onto `profile`.
    pub fn apply_to(&self, profile: &mut MentorProfile, at: DateTime<Utc>) {
        fn text(value: Option<&String>, field: &mut Option<String>) {
            if let Some(value) = value {
                let trimmed = value.trim();
                *field = (!trimmed.is_empty()).then(|| trimmed.to_string());
            }
        }

        text(self.bio.as_ref(), &mut profile.bio);
        text(self.education.as_ref(), &mut profile.education);
        text(self.company.as_ref(), &mut profile.company);
        text(self.position.as_ref(), &mut profile.position);
        if let Some(domains) = &self.domains {
            profile.domains.clone_from(domains);
        }
        if let Some(languages) = &self.languages {
            profile.languages.clone_from(languages);
        }
        if self.experience_years.is_some() {
            profile.experience_years = self.experience_years;
        }
        if self.hourly_rate.is_some() {
            profile.hourly_rate = self.hourly_rate;
        }
        if let Some(hours) = &self.availability_hours {
            profile.availability_hours.clone_from(hours);
        }
        if let Some(links) = &self.social_links {
            profile.social_links.clone_from(links);
        }
        profile.updated_at = at;
    }
}

fn normalize_tags(kind: &str, tags: Vec<String>) -> Result<Vec<String>, BookingError> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            return Err(BookingError::Validation(format!("{kind} must not be blank")));
        }
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    Ok(normalized)
}

/// A mentor as shown to mentees browsing a domain
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MentorListing {
    /// The mentor's profile
    pub profile: MentorProfile,
    /// Open slots that have not started yet
    pub open_slots: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn range_rejects_empty_and_inverted() {
        assert!(matches!(
            TimeRange::new(at(10, 0), at(10, 0)),
            Err(BookingError::InvalidRange { .. })
        ));
        assert!(TimeRange::new(at(11, 0), at(10, 0)).is_err());
        assert!(TimeRange::new(at(10, 0), at(10, 1)).is_ok());
    }

    #[test]
    fn touching_ranges_do_not_overlap() {
        let morning = TimeRange::new(at(9, 0), at(10, 0)).unwrap();
        let next = TimeRange::new(at(10, 0), at(11, 0)).unwrap();
        let straddle = TimeRange::new(at(9, 30), at(10, 30)).unwrap();

        assert!(!morning.overlaps(&next));
        assert!(morning.overlaps(&straddle));
        assert!(straddle.overlaps(&next));
    }

    #[test]
    fn contains_is_inclusive_on_both_ends() {
        let range = TimeRange::new(at(10, 0), at(11, 0)).unwrap();
        assert!(range.contains(at(10, 0)));
        assert!(range.contains(at(11, 0)));
        assert!(!range.contains(at(11, 1)));
        assert!(!range.contains(at(9, 59)));
    }

    #[test]
    fn deserializing_an_inverted_range_fails() {
        let json = r#"{"start":"2025-03-10T11:00:00Z","end":"2025-03-10T10:00:00Z"}"#;
        assert!(serde_json::from_str::<TimeRange>(json).is_err());
    }

    #[test]
    fn transition_table() {
        use SessionStatus::*;
        use SessionTrigger::*;

        assert_eq!(Requested.apply(Accept), Some(Confirmed));
        assert_eq!(Requested.apply(Decline), Some(Declined));
        assert_eq!(Confirmed.apply(Cancel), Some(Cancelled));
        assert_eq!(Confirmed.apply(Complete), Some(Completed));

        assert_eq!(Requested.apply(Complete), None);
        assert_eq!(Requested.apply(Cancel), None);
        assert_eq!(Confirmed.apply(Accept), None);
        for terminal in [Declined, Completed, Cancelled] {
            assert!(terminal.is_terminal());
            for trigger in [Accept, Decline, Cancel, Complete] {
                assert_eq!(terminal.apply(trigger), None);
            }
        }
    }

    #[test]
    fn status_strings_parse_back() {
        for status in [
            SessionStatus::Requested,
            SessionStatus::Confirmed,
            SessionStatus::Declined,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SessionStatus::parse("expired").is_err());
        assert_eq!(NotificationKind::parse("follow-up").unwrap(), NotificationKind::FollowUp);
        assert_eq!(
            serde_json::to_string(&NotificationKind::FollowUp).unwrap(),
            "\"follow-up\""
        );
    }

    #[test]
    fn money_formats_as_dollars() {
        assert_eq!(Money::from_cents(4_999).to_string(), "$49.99");
        assert_eq!(Money::checked_from_dollars(50), Some(Money::from_cents(5_000)));
        assert!(Money::checked_from_dollars(u64::MAX).is_none());
    }

    #[test]
    fn profile_update_normalizes_tags() {
        let update = ProfileUpdate {
            domains: Some(vec![" Rust ".to_string(), "rust".to_string(), "Databases".to_string()]),
            ..ProfileUpdate::default()
        }
        .validated()
        .unwrap();
        assert_eq!(
            update.domains,
            Some(vec!["rust".to_string(), "databases".to_string()])
        );

        let blank = ProfileUpdate {
            languages: Some(vec!["english".to_string(), "  ".to_string()]),
            ..ProfileUpdate::default()
        };
        assert!(matches!(blank.validated(), Err(BookingError::Validation(_))));

        let veteran = ProfileUpdate {
            experience_years: Some(MAX_EXPERIENCE_YEARS + 1),
            ..ProfileUpdate::default()
        };
        assert!(veteran.validated().is_err());
    }

    #[test]
    fn profile_update_only_touches_provided_fields() {
        let mentor = UserId::new();
        let mut profile = MentorProfile::empty(mentor, at(9, 0));
        ProfileUpdate {
            bio: Some("Backend engineer".to_string()),
            company: Some("Acme".to_string()),
            hourly_rate: Some(Money::from_cents(9_000)),
            ..ProfileUpdate::default()
        }
        .apply_to(&mut profile, at(9, 0));

        ProfileUpdate {
            company: Some(String::new()),
            domains: Some(vec!["rust".to_string()]),
            ..ProfileUpdate::default()
        }
        .apply_to(&mut profile, at(10, 0));

        assert_eq!(profile.bio.as_deref(), Some("Backend engineer"));
        assert_eq!(profile.company, None);
        assert_eq!(profile.hourly_rate, Some(Money::from_cents(9_000)));
        assert!(profile.covers("RUST"));
        assert!(!profile.covers("go"));
        assert_eq!(profile.updated_at, at(10, 0));
    }
}
