//! Failure paths of the orchestrator.
//!
//! - A session that cannot be created releases its slot reservation
//! - A failing notification channel never fails the transition
//! - A charge that cannot be recorded is voided at the processor
//! - A failed refund keeps the payment completed and can be retried
//!
//! Run with: `cargo test --test compensation_test`

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use mentorly_booking::config::TimeoutConfig;
use mentorly_booking::notifications::{
    NotificationDispatcher, NotificationError, NotificationRequest, NotifyFuture,
};
use mentorly_booking::payment_gateway::{
    Charge, GatewayFuture, MockPaymentGateway, PaymentGateway, PaymentGatewayError,
};
use mentorly_booking::stores::{InMemoryBookingStore, SessionRepository, StoreFuture};
use mentorly_booking::video::MockVideoProvider;
use mentorly_booking::{
    BookingError, BookingOrchestrator, BookingStores, Decision, Money, Payment, PaymentId,
    PaymentMethod, PaymentStatus, Session, SessionId, SessionStatus, StoreError, UserId,
    UserRole, VideoCall,
};
use mentorly_core::environment::Clock;
use mentorly_testing::mocks::FixedClock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, hour, 0, 0).unwrap()
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(at(8)))
}

fn card() -> PaymentMethod {
    PaymentMethod::CreditCard {
        last_four: "1111".to_string(),
    }
}

/// Session repository whose inserts and payment writes can be made to fail.
struct FaultySessions {
    inner: Arc<InMemoryBookingStore>,
    fail_inserts: AtomicBool,
    fail_payments: AtomicBool,
}

impl FaultySessions {
    fn new(inner: Arc<InMemoryBookingStore>) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_payments: AtomicBool::new(false),
        }
    }
}

impl SessionRepository for FaultySessions {
    fn insert_session(&self, session: Session) -> StoreFuture<'_, Session> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Box::pin(async { Err(StoreError::Database("connection reset".to_string())) });
        }
        self.inner.insert_session(session)
    }

    fn get_session(&self, session_id: SessionId) -> StoreFuture<'_, Option<Session>> {
        self.inner.get_session(session_id)
    }

    fn sessions_for(&self, user_id: UserId, role: UserRole) -> StoreFuture<'_, Vec<Session>> {
        self.inner.sessions_for(user_id, role)
    }

    fn transition_status(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        self.inner.transition_status(session_id, from, to, at)
    }

    fn complete_payment(&self, payment: Payment, at: DateTime<Utc>) -> StoreFuture<'_, Session> {
        if self.fail_payments.load(Ordering::SeqCst) {
            return Box::pin(async { Err(StoreError::Database("disk full".to_string())) });
        }
        self.inner.complete_payment(payment, at)
    }

    fn claim_refund(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        abandoned_before: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        self.inner.claim_refund(session_id, at, abandoned_before)
    }

    fn release_refund_claim(&self, session_id: SessionId) -> StoreFuture<'_, ()> {
        self.inner.release_refund_claim(session_id)
    }

    fn refund_payment(&self, session_id: SessionId, at: DateTime<Utc>) -> StoreFuture<'_, Session> {
        self.inner.refund_payment(session_id, at)
    }

    fn get_payment(&self, payment_id: PaymentId) -> StoreFuture<'_, Option<Payment>> {
        self.inner.get_payment(payment_id)
    }

    fn update_notes(
        &self,
        session_id: SessionId,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        self.inner.update_notes(session_id, notes, at)
    }

    fn update_transcript(
        &self,
        session_id: SessionId,
        transcript: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        self.inner.update_transcript(session_id, transcript, at)
    }

    fn link_video_call(
        &self,
        session_id: SessionId,
        call_ref: String,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Session> {
        self.inner.link_video_call(session_id, call_ref, at)
    }

    fn save_video_call(&self, call: VideoCall) -> StoreFuture<'_, ()> {
        self.inner.save_video_call(call)
    }

    fn video_call_for(&self, session_id: SessionId) -> StoreFuture<'_, Option<VideoCall>> {
        self.inner.video_call_for(session_id)
    }
}

/// Gateway that records refunds and can refuse a number of them.
#[derive(Default)]
struct RecordingGateway {
    inner: MockPaymentGateway,
    refusals_left: AtomicUsize,
    refunded: Arc<Mutex<Vec<String>>>,
}

impl PaymentGateway for RecordingGateway {
    fn charge(&self, payment_id: PaymentId, amount: Money, method: PaymentMethod) -> GatewayFuture<Charge> {
        self.inner.charge(payment_id, amount, method)
    }

    fn refund(&self, transaction_ref: &str, amount: Money) -> GatewayFuture<String> {
        let refuse = self
            .refusals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Box::pin(async { Err(PaymentGatewayError::Other("processor offline".to_string())) });
        }
        self.refunded
            .lock()
            .unwrap()
            .push(transaction_ref.to_string());
        self.inner.refund(transaction_ref, amount)
    }
}

struct SilentNotifier;

impl NotificationDispatcher for SilentNotifier {
    fn notify(&self, _request: NotificationRequest) -> NotifyFuture {
        Box::pin(async { Err(NotificationError::Store("mail relay down".to_string())) })
    }
}

struct Fixture {
    booking: BookingOrchestrator,
    sessions: Arc<FaultySessions>,
    gateway: Arc<RecordingGateway>,
    mentor: UserId,
    mentee: UserId,
}

fn fixture() -> Fixture {
    fixture_with_timeouts(TimeoutConfig::default())
}

fn fixture_with_timeouts(timeouts: TimeoutConfig) -> Fixture {
    let store = Arc::new(InMemoryBookingStore::new());
    let sessions = Arc::new(FaultySessions::new(Arc::clone(&store)));
    let gateway = Arc::new(RecordingGateway::default());
    let stores = BookingStores {
        slots: store.clone(),
        sessions: sessions.clone(),
        notifications: store.clone(),
        profiles: store,
    };
    Fixture {
        booking: BookingOrchestrator::new(
            stores,
            gateway.clone(),
            Arc::new(MockVideoProvider::new()),
            clock(),
            timeouts,
        ),
        sessions,
        gateway,
        mentor: UserId::new(),
        mentee: UserId::new(),
    }
}

#[tokio::test]
async fn failed_session_creation_releases_the_slot() {
    let f = fixture();
    let slot = f.booking.publish_slot(f.mentor, at(10), at(11)).await.unwrap();
    f.sessions.fail_inserts.store(true, Ordering::SeqCst);

    let err = f
        .booking
        .request_booking(f.mentor, f.mentee, slot.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Storage(_)));

    let slot = f.booking.availability().get(slot.id).await.unwrap();
    assert!(!slot.is_booked);
    let open: Vec<_> = f
        .booking
        .list_open_slots(f.mentor, None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(open, vec![slot.clone()]);
    assert!(f.booking.notifications_for(f.mentor).await.unwrap().is_empty());

    // The released slot can be booked again
    f.sessions.fail_inserts.store(false, Ordering::SeqCst);
    let session = f
        .booking
        .request_booking(f.mentor, f.mentee, slot.id)
        .await
        .unwrap();
    assert_eq!(session.slot_id, slot.id);
}

#[tokio::test]
async fn notification_failures_do_not_fail_transitions() {
    let f = fixture();
    let booking = f.booking.with_notifier(Arc::new(SilentNotifier));
    let slot = booking.publish_slot(f.mentor, at(10), at(11)).await.unwrap();

    let session = booking
        .request_booking(f.mentor, f.mentee, slot.id)
        .await
        .unwrap();
    let session = booking
        .respond_to_request(session.id, f.mentor, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Confirmed);
    assert!(booking.notifications_for(f.mentee).await.unwrap().is_empty());
    assert!(booking.notifications_for(f.mentor).await.unwrap().is_empty());
}

#[tokio::test]
async fn unrecorded_charge_is_voided() {
    let f = fixture();
    let slot = f.booking.publish_slot(f.mentor, at(10), at(11)).await.unwrap();
    let session = f
        .booking
        .request_booking(f.mentor, f.mentee, slot.id)
        .await
        .unwrap();
    f.sessions.fail_payments.store(true, Ordering::SeqCst);

    let err = f
        .booking
        .pay_for_session(session.id, f.mentee, Money::from_cents(3_000), card())
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Storage(_)));
    assert_eq!(f.gateway.refunded.lock().unwrap().len(), 1);

    let stored = f.booking.get_session(session.id, f.mentee).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(stored.payment_ref.is_none());
}

#[tokio::test]
async fn failed_refund_keeps_the_cancellation_and_can_be_retried() {
    let f = fixture();
    let slot = f.booking.publish_slot(f.mentor, at(10), at(11)).await.unwrap();
    let session = f
        .booking
        .request_booking(f.mentor, f.mentee, slot.id)
        .await
        .unwrap();
    f.booking
        .respond_to_request(session.id, f.mentor, Decision::Accept)
        .await
        .unwrap();
    f.booking
        .pay_for_session(session.id, f.mentee, Money::from_cents(3_000), card())
        .await
        .unwrap();

    f.gateway.refusals_left.store(1, Ordering::SeqCst);
    let err = f
        .booking
        .cancel_session(session.id, f.mentee)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Payment(_)));

    let stored = f.booking.get_session(session.id, f.mentee).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
    assert_eq!(stored.payment_status, PaymentStatus::Completed);

    let refunded = f
        .booking
        .refund_session(session.id, f.mentee)
        .await
        .unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(f.gateway.refunded.lock().unwrap().len(), 1);

    let outsider = UserId::new();
    assert!(matches!(
        f.booking.refund_session(session.id, outsider).await,
        Err(BookingError::Unauthorized { .. })
    ));
}

#[tokio::test]
async fn slow_processor_times_out_without_recording_a_payment() {
    let store = Arc::new(InMemoryBookingStore::new());
    let booking = BookingOrchestrator::new(
        BookingStores::shared(store),
        Arc::new(MockPaymentGateway::new().with_latency(Duration::from_millis(200))),
        Arc::new(MockVideoProvider::new()),
        clock(),
        TimeoutConfig {
            external_call_ms: 20,
            notification_ms: 2_000,
        },
    );
    let mentor = UserId::new();
    let mentee = UserId::new();
    let slot = booking.publish_slot(mentor, at(10), at(11)).await.unwrap();
    let session = booking.request_booking(mentor, mentee, slot.id).await.unwrap();

    let err = booking
        .pay_for_session(session.id, mentee, Money::from_cents(3_000), card())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BookingError::Timeout {
            operation: "payment charge",
            timeout_ms: 20,
        }
    );
    let stored = booking.get_session(session.id, mentee).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}
