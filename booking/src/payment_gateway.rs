//! Payment processor boundary.
//!
//! The engine only needs two calls from a processor: charge an amount and refund a
//! previous charge. [`MockPaymentGateway`] stands in for a real integration in tests
//! and the demo.

use crate::types::{Money, PaymentId, PaymentMethod};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Boxed future returned by gateway calls
pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    /// Charge refused by the issuer
    #[error("Card declined: {reason}")]
    Declined {
        /// Decline reason
        reason: String,
    },
    /// Method cannot be charged
    #[error("Invalid payment method: {reason}")]
    InvalidPaymentMethod {
        /// Invalid reason
        reason: String,
    },
    /// Refund target unknown to the processor
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),
    /// Other error
    #[error("Payment processor error: {0}")]
    Other(String),
}

/// A successful charge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    /// Payment the charge belongs to
    pub payment_id: PaymentId,
    /// Processor transaction reference
    pub transaction_ref: String,
    /// Amount charged
    pub amount: Money,
}

/// Abstraction over payment processors.
pub trait PaymentGateway: Send + Sync {
    /// Charge `amount` with `method`.
    ///
    /// # Errors
    ///
    /// Returns error if the processor refuses or fails the charge
    fn charge(&self, payment_id: PaymentId, amount: Money, method: PaymentMethod)
    -> GatewayFuture<Charge>;

    /// Refund a previous charge, returning the refund reference.
    ///
    /// # Errors
    ///
    /// Returns error if the refund fails
    fn refund(&self, transaction_ref: &str, amount: Money) -> GatewayFuture<String>;
}

/// In-process gateway that approves everything unless configured to decline.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    latency: Duration,
    decline_reason: Option<String>,
}

impl MockPaymentGateway {
    /// Gateway that approves every charge immediately
    #[must_use]
    pub const fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            decline_reason: None,
        }
    }

    /// Simulate network delay on every call
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Gateway that declines every charge and refund with `reason`
    #[must_use]
    pub fn declining(reason: impl Into<String>) -> Self {
        Self {
            latency: Duration::ZERO,
            decline_reason: Some(reason.into()),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn charge(
        &self,
        payment_id: PaymentId,
        amount: Money,
        method: PaymentMethod,
    ) -> GatewayFuture<Charge> {
        let latency = self.latency;
        let decline_reason = self.decline_reason.clone();
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if let Some(reason) = decline_reason {
                return Err(PaymentGatewayError::Declined { reason });
            }
            if let PaymentMethod::CreditCard { last_four } = &method {
                if last_four.len() != 4 || !last_four.chars().all(|c| c.is_ascii_digit()) {
                    return Err(PaymentGatewayError::InvalidPaymentMethod {
                        reason: "card number must end in four digits".to_string(),
                    });
                }
            }

            let transaction_ref = format!("mock_txn_{}", uuid::Uuid::new_v4());
            tracing::debug!(
                payment_id = %payment_id,
                amount = amount.cents(),
                transaction_ref = %transaction_ref,
                "Mock charge approved"
            );
            Ok(Charge {
                payment_id,
                transaction_ref,
                amount,
            })
        })
    }

    fn refund(&self, transaction_ref: &str, amount: Money) -> GatewayFuture<String> {
        let latency = self.latency;
        let decline_reason = self.decline_reason.clone();
        let transaction_ref = transaction_ref.to_string();
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if let Some(reason) = decline_reason {
                return Err(PaymentGatewayError::Declined { reason });
            }
            if transaction_ref.is_empty() {
                return Err(PaymentGatewayError::UnknownTransaction(transaction_ref));
            }

            let refund_ref = format!("mock_refund_{}", uuid::Uuid::new_v4());
            tracing::debug!(
                transaction_ref = %transaction_ref,
                amount = amount.cents(),
                refund_ref = %refund_ref,
                "Mock refund processed"
            );
            Ok(refund_ref)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn card() -> PaymentMethod {
        PaymentMethod::CreditCard {
            last_four: "4242".to_string(),
        }
    }

    #[tokio::test]
    async fn charge_returns_a_transaction_ref() {
        let payment_id = PaymentId::new();
        let charge = MockPaymentGateway::new()
            .charge(payment_id, Money::from_cents(5_000), card())
            .await
            .unwrap();

        assert_eq!(charge.payment_id, payment_id);
        assert_eq!(charge.amount, Money::from_cents(5_000));
        assert!(charge.transaction_ref.starts_with("mock_txn_"));
    }

    #[tokio::test]
    async fn declining_gateway_refuses_charges() {
        let result = MockPaymentGateway::declining("insufficient funds")
            .charge(PaymentId::new(), Money::from_cents(100), card())
            .await;
        assert_eq!(
            result,
            Err(PaymentGatewayError::Declined {
                reason: "insufficient funds".to_string()
            })
        );
    }

    #[tokio::test]
    async fn malformed_card_is_rejected() {
        let result = MockPaymentGateway::new()
            .charge(
                PaymentId::new(),
                Money::from_cents(100),
                PaymentMethod::CreditCard {
                    last_four: "42".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(PaymentGatewayError::InvalidPaymentMethod { .. })));
    }

    #[tokio::test]
    async fn refund_needs_a_transaction() {
        let gateway = MockPaymentGateway::new();
        assert!(gateway.refund("mock_txn_1", Money::from_cents(100)).await.is_ok());
        assert!(matches!(
            gateway.refund("", Money::from_cents(100)).await,
            Err(PaymentGatewayError::UnknownTransaction(_))
        ));
    }
}
