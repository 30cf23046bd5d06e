//! Business metrics for the booking engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `mentorly_slots_published_total` - Slots published by mentors
//! - `mentorly_bookings_total{outcome}` - Booking requests by outcome
//! - `mentorly_booking_compensations_total{outcome}` - Slot reservations rolled back
//! - `mentorly_session_transitions_total{to}` - Committed status transitions
//! - `mentorly_notifications_total{outcome}` - Notification dispatch attempts
//! - `mentorly_payments_total{status}` - Payment operations by resulting status
//! - `mentorly_payment_revenue_cents_total` - Revenue from completed payments in cents
//! - `mentorly_live_session_joins_total{outcome}` - Live-session access attempts
//! - `mentorly_profile_updates_total` - Mentor profile changes

use metrics::{counter, describe_counter};

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "mentorly_slots_published_total",
        "Total number of availability slots published"
    );
    describe_counter!(
        "mentorly_bookings_total",
        "Total number of booking requests by outcome (created, already_booked, failed)"
    );
    describe_counter!(
        "mentorly_booking_compensations_total",
        "Slot reservations rolled back after session creation failed, by outcome"
    );
    describe_counter!(
        "mentorly_session_transitions_total",
        "Total number of committed session status transitions by target status"
    );
    describe_counter!(
        "mentorly_notifications_total",
        "Notification dispatch attempts by outcome (delivered, failed)"
    );
    describe_counter!(
        "mentorly_payments_total",
        "Total number of payment operations by status (completed, refunded, failed)"
    );
    describe_counter!(
        "mentorly_payment_revenue_cents_total",
        "Total revenue from completed payments in cents"
    );
    describe_counter!(
        "mentorly_live_session_joins_total",
        "Live-session access attempts by outcome (granted, denied)"
    );
    describe_counter!(
        "mentorly_profile_updates_total",
        "Total number of mentor profile creations and updates"
    );

    tracing::info!("Business metrics registered");
}

/// Record a published slot
pub fn record_slot_published() {
    counter!("mentorly_slots_published_total").increment(1);
}

/// Record a booking request outcome
pub fn record_booking(outcome: &'static str) {
    counter!("mentorly_bookings_total", "outcome" => outcome).increment(1);
}

/// Record a compensation attempt (`released` or `failed`)
pub fn record_compensation(outcome: &'static str) {
    counter!("mentorly_booking_compensations_total", "outcome" => outcome).increment(1);
}

/// Record a committed transition
pub fn record_transition(to: &'static str) {
    counter!("mentorly_session_transitions_total", "to" => to).increment(1);
}

/// Record a notification dispatch outcome
pub fn record_notification(outcome: &'static str) {
    counter!("mentorly_notifications_total", "outcome" => outcome).increment(1);
}

/// Record a payment outcome; completed payments also add to revenue
pub fn record_payment(status: &'static str, amount_cents: u64) {
    counter!("mentorly_payments_total", "status" => status).increment(1);
    if status == "completed" {
        counter!("mentorly_payment_revenue_cents_total").increment(amount_cents);
    }
}

/// Record a live-session access attempt
pub fn record_live_join(outcome: &'static str) {
    counter!("mentorly_live_session_joins_total", "outcome" => outcome).increment(1);
}


/// Record a mentor profile change
pub fn record_profile_update() {
    counter!("mentorly_profile_updates_total").increment(1);
}
