//! Concurrency tests: racing bookings, racing transitions and racing payments.
//!
//! Every race must resolve to exactly one winner; losers see a conflict error and
//! leave no trace in the stores.
//!
//! Run with: `cargo test --test concurrency_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use mentorly_booking::config::TimeoutConfig;
use mentorly_booking::payment_gateway::{
    Charge, GatewayFuture, MockPaymentGateway, PaymentGateway, PaymentGatewayError,
};
use mentorly_booking::video::MockVideoProvider;
use mentorly_booking::{
    BookingError, BookingOrchestrator, BookingStores, Decision, Money, PaymentId, PaymentMethod,
    PaymentStatus, Session, SessionStatus, UserId, UserRole,
};
use mentorly_testing::mocks::FixedClock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, hour, 0, 0).unwrap()
}

fn orchestrator() -> Arc<BookingOrchestrator> {
    Arc::new(BookingOrchestrator::new(
        BookingStores::in_memory(),
        Arc::new(MockPaymentGateway::new().with_latency(std::time::Duration::from_millis(5))),
        Arc::new(MockVideoProvider::new()),
        Arc::new(FixedClock::new(at(8))),
        TimeoutConfig::default(),
    ))
}

/// Slow processor that counts refunds and refuses the first `refusals` of them.
struct CountingGateway {
    inner: MockPaymentGateway,
    refusals_left: AtomicUsize,
    refunds: AtomicUsize,
}

impl CountingGateway {
    fn refusing(refusals: usize) -> Self {
        Self {
            inner: MockPaymentGateway::new().with_latency(std::time::Duration::from_millis(50)),
            refusals_left: AtomicUsize::new(refusals),
            refunds: AtomicUsize::new(0),
        }
    }
}

impl PaymentGateway for CountingGateway {
    fn charge(
        &self,
        payment_id: PaymentId,
        amount: Money,
        method: PaymentMethod,
    ) -> GatewayFuture<Charge> {
        self.inner.charge(payment_id, amount, method)
    }

    fn refund(&self, transaction_ref: &str, amount: Money) -> GatewayFuture<String> {
        let refuse = self
            .refusals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Box::pin(async {
                Err(PaymentGatewayError::Other("processor offline".to_string()))
            });
        }
        self.refunds.fetch_add(1, Ordering::SeqCst);
        self.inner.refund(transaction_ref, amount)
    }
}

async fn requested_session(booking: &BookingOrchestrator, mentor: UserId, mentee: UserId) -> Session {
    let slot = booking.publish_slot(mentor, at(10), at(11)).await.unwrap();
    booking.request_booking(mentor, mentee, slot.id).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_for_one_slot_have_one_winner() {
    const MENTEES: usize = 16;

    let booking = orchestrator();
    let mentor = UserId::new();
    let slot = booking.publish_slot(mentor, at(10), at(11)).await.unwrap();
    let slot_id = slot.id;

    let handles: Vec<_> = (0..MENTEES)
        .map(|_| {
            let booking = Arc::clone(&booking);
            tokio::spawn(async move {
                let mentee = UserId::new();
                (mentee, booking.request_booking(mentor, mentee, slot_id).await)
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let winners: Vec<_> = results.iter().filter(|(_, r)| r.is_ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one booking must win");
    let (winner, session) = winners[0];
    let session = session.as_ref().unwrap();
    assert_eq!(session.status, SessionStatus::Requested);
    assert_eq!(session.mentee_id, *winner);

    for (mentee, result) in &results {
        if mentee == winner {
            continue;
        }
        assert_eq!(result.as_ref().unwrap_err(), &BookingError::AlreadyBooked(slot.id));
        // Losers leave no session behind
        let theirs = booking.sessions_for(*mentee, UserRole::Mentee).await.unwrap();
        assert!(theirs.is_empty());
    }

    let sessions = booking.sessions_for(mentor, UserRole::Mentor).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(booking.notifications_for(mentor).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_responses_resolve_to_one_transition() {
    let booking = orchestrator();
    let mentor = UserId::new();
    let mentee = UserId::new();
    let session_id = requested_session(&booking, mentor, mentee).await.id;

    let accept = {
        let booking = Arc::clone(&booking);
        tokio::spawn(async move {
            booking
                .respond_to_request(session_id, mentor, Decision::Accept)
                .await
        })
    };
    let decline = {
        let booking = Arc::clone(&booking);
        tokio::spawn(async move {
            booking
                .respond_to_request(session_id, mentor, Decision::Decline)
                .await
        })
    };
    let (accept, decline) = (accept.await.unwrap(), decline.await.unwrap());

    assert!(
        accept.is_ok() ^ decline.is_ok(),
        "exactly one response must commit"
    );
    let loser = accept.as_ref().err().or(decline.as_ref().err()).unwrap();
    assert!(matches!(loser, BookingError::IllegalTransition { .. }));

    let stored = booking.get_session(session_id, mentor).await.unwrap();
    let expected = if accept.is_ok() {
        SessionStatus::Confirmed
    } else {
        SessionStatus::Declined
    };
    assert_eq!(stored.status, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_and_complete_race_on_a_confirmed_session() {
    let booking = orchestrator();
    let mentor = UserId::new();
    let mentee = UserId::new();
    let session_id = requested_session(&booking, mentor, mentee).await.id;
    booking
        .respond_to_request(session_id, mentor, Decision::Accept)
        .await
        .unwrap();

    let cancel = {
        let booking = Arc::clone(&booking);
        tokio::spawn(async move { booking.cancel_session(session_id, mentee).await })
    };
    let complete = {
        let booking = Arc::clone(&booking);
        tokio::spawn(async move { booking.complete_session(session_id).await })
    };
    let (cancel, complete) = (cancel.await.unwrap(), complete.await.unwrap());

    assert!(cancel.is_ok() ^ complete.is_ok());
    let stored = booking.get_session(session_id, mentee).await.unwrap();
    assert!(stored.status.is_terminal());
    match (cancel, complete) {
        (Ok(_), Err(e)) => {
            assert_eq!(stored.status, SessionStatus::Cancelled);
            assert!(matches!(
                e,
                BookingError::IllegalTransition {
                    from: SessionStatus::Cancelled,
                    ..
                }
            ));
        },
        (Err(e), Ok(_)) => {
            assert_eq!(stored.status, SessionStatus::Completed);
            assert!(matches!(
                e,
                BookingError::IllegalTransition {
                    from: SessionStatus::Completed,
                    ..
                }
            ));
        },
        other => panic!("expected exactly one winner, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn double_payment_is_rejected() {
    let booking = orchestrator();
    let mentor = UserId::new();
    let mentee = UserId::new();
    let session_id = requested_session(&booking, mentor, mentee).await.id;

    let pay = move |booking: Arc<BookingOrchestrator>| async move {
        booking
            .pay_for_session(
                session_id,
                mentee,
                Money::from_cents(4_000),
                PaymentMethod::PayPal {
                    email: "mentee@example.com".to_string(),
                },
            )
            .await
    };
    let first = tokio::spawn(pay(Arc::clone(&booking)));
    let second = tokio::spawn(pay(Arc::clone(&booking)));
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert!(first.is_ok() ^ second.is_ok(), "exactly one payment must be recorded");
    let loser = first.as_ref().err().or(second.as_ref().err()).unwrap();
    assert!(matches!(loser, BookingError::InvalidState { .. }));

    let stored = booking.get_session(session_id, mentee).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    let winner = first.or(second).unwrap();
    assert_eq!(stored.payment_ref, winner.payment_ref);
}

#[tokio::test]
async fn slots_of_different_mentors_never_conflict() {
    let booking = orchestrator();
    let first = UserId::new();
    let second = UserId::new();

    booking.publish_slot(first, at(10), at(11)).await.unwrap();
    booking.publish_slot(second, at(10), at(11)).await.unwrap();
    let err = booking
        .publish_slot(first, at(10) + Duration::minutes(59), at(12))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Overlap { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_refund_retries_refund_the_charge_once() {
    let gateway = Arc::new(CountingGateway::refusing(1));
    let booking = Arc::new(BookingOrchestrator::new(
        BookingStores::in_memory(),
        Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        Arc::new(MockVideoProvider::new()),
        Arc::new(FixedClock::new(at(8))),
        TimeoutConfig::default(),
    ));
    let mentor = UserId::new();
    let mentee = UserId::new();
    let session_id = requested_session(&booking, mentor, mentee).await.id;
    booking
        .respond_to_request(session_id, mentor, Decision::Accept)
        .await
        .unwrap();
    booking
        .pay_for_session(
            session_id,
            mentee,
            Money::from_cents(4_000),
            PaymentMethod::PayPal {
                email: "mentee@example.com".to_string(),
            },
        )
        .await
        .unwrap();

    // First refund is refused, leaving a cancelled session with a completed payment
    let err = booking.cancel_session(session_id, mentee).await.unwrap_err();
    assert!(matches!(err, BookingError::Payment(_)));

    let retry = |actor: UserId| {
        let booking = Arc::clone(&booking);
        tokio::spawn(async move { booking.refund_session(session_id, actor).await })
    };
    let (first, second) = (retry(mentee), retry(mentor));
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert!(first.is_ok() ^ second.is_ok(), "exactly one refund must commit");
    let loser = first.as_ref().err().or(second.as_ref().err()).unwrap();
    assert!(matches!(loser, BookingError::InvalidState { .. }));
    assert_eq!(gateway.refunds.load(Ordering::SeqCst), 1);

    let stored = booking.get_session(session_id, mentee).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
}
