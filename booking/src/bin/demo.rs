//! Booking engine demo
//!
//! Walks one session through its whole life:
//! - Mentor publishes availability
//! - Mentee books a slot, mentor accepts
//! - Mentee pays, both join the live call
//! - The call ends and the session completes
//!
//! # Usage
//!
//! ```bash
//! # In-memory stores
//! cargo run --bin mentorly-demo
//!
//! # PostgreSQL
//! STORAGE_BACKEND=postgres DATABASE_URL=postgres://... cargo run --bin mentorly-demo
//! ```

use chrono::Duration;
use mentorly_booking::metrics::register_business_metrics;
use mentorly_booking::payment_gateway::MockPaymentGateway;
use mentorly_booking::video::MockVideoProvider;
use mentorly_booking::{
    BookingOrchestrator, BookingStores, Config, Decision, Money, PaymentMethod, ProfileUpdate,
    UserId,
};
use mentorly_core::environment::{Clock, SystemClock};
use mentorly_runtime::metrics::MetricsServer;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mentorly_booking=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.observability.metrics_enabled {
        let mut server = MetricsServer::new(config.observability.metrics_address().parse()?);
        server.start()?;
        register_business_metrics();
    }

    println!("\n============================================");
    println!("   Mentorly Booking - Live Demo");
    println!("============================================\n");

    let stores = BookingStores::from_config(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let booking = BookingOrchestrator::new(
        stores,
        Arc::new(MockPaymentGateway::new()),
        Arc::new(MockVideoProvider::new()),
        Arc::clone(&clock),
        config.timeouts,
    );

    let mentor = UserId::new();
    let mentee = UserId::new();

    println!("0. Mentor fills in a profile");
    let profile = booking
        .upsert_mentor_profile(
            mentor,
            ProfileUpdate {
                bio: Some("Backend engineer, ten years of Rust and Postgres".to_string()),
                domains: Some(vec!["rust".to_string(), "databases".to_string()]),
                hourly_rate: Some(Money::from_cents(7_500)),
                ..ProfileUpdate::default()
            },
        )
        .await?;
    println!("   domains: {}\n", profile.domains.join(", "));

    // Slot already running so the live call can be joined right away
    let now = clock.now();
    println!("1. Mentor publishes a slot");
    let slot = booking
        .publish_slot(mentor, now - Duration::minutes(5), now + Duration::minutes(55))
        .await?;
    println!("   slot {} [{}]", slot.id, slot.range);
    for listing in booking.mentors_in_domain(Some("rust")).await? {
        println!(
            "   directory: mentor {} with {} upcoming open slot(s)",
            listing.profile.mentor_id, listing.open_slots
        );
    }
    println!();

    println!("2. Mentee requests the slot");
    let session = booking.request_booking(mentor, mentee, slot.id).await?;
    println!("   session {} is {}\n", session.id, session.status);

    println!("3. Mentor accepts");
    let session = booking
        .respond_to_request(session.id, mentor, Decision::Accept)
        .await?;
    println!("   session is {}\n", session.status);

    println!("4. Mentee pays");
    let session = booking
        .pay_for_session(
            session.id,
            mentee,
            Money::from_cents(7_500),
            PaymentMethod::CreditCard {
                last_four: "4242".to_string(),
            },
        )
        .await?;
    println!("   payment is {}\n", session.payment_status);

    println!("5. Both join the live call");
    let mentor_call = booking.join_live_session(session.id, mentor).await?;
    let mentee_call = booking.join_live_session(session.id, mentee).await?;
    println!("   mentor: {}", mentor_call.join_url);
    println!("   mentee: {}\n", mentee_call.join_url);

    println!("6. Call ends");
    let session = booking
        .end_live_session(
            session.id,
            mentor,
            Some("Discussed career goals and next steps.".to_string()),
            Some("Follow up in two weeks".to_string()),
        )
        .await?;
    println!("   session is {}\n", session.status);

    println!("7. Notification centers");
    for (label, user) in [("mentor", mentor), ("mentee", mentee)] {
        let unread = booking.unread_count(user).await?;
        println!("   {label} ({unread} unread)");
        for notification in booking.notifications_for(user).await? {
            println!("     - [{}] {}", notification.kind, notification.title);
        }
    }

    println!("\n✓ Demo complete");
    Ok(())
}
