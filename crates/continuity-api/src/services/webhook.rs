//! Payment notification reconciliation.
//!
//! Turns a verified provider event into at most one ledger top-up. The
//! provider's event id is the idempotency key, so redeliveries are absorbed.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use continuity_ledger::{AccountingEngine, TopupOutcome};
use continuity_models::{idempotency, PaymentEvent, UserId};

use crate::error::{ApiError, ApiResult};
use crate::security::{self, SignatureError};

/// The only event type that credits the ledger.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// What a notification did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited { balance_after: u64 },
    /// The event was applied by an earlier delivery.
    Duplicate,
    /// Valid, but nothing to credit.
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Credited { .. } => "credited",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: Value,
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutSession {
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    amount_total: Option<u64>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl CheckoutSession {
    fn user_id(&self) -> Option<UserId> {
        self.client_reference_id
            .as_deref()
            .or_else(|| self.metadata.get("user_id").map(String::as_str))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(UserId::new)
    }

    fn credits(&self, price_per_credit_cents: u64) -> u64 {
        if let Some(credits) = self.metadata.get("credits").and_then(|c| c.trim().parse().ok()) {
            return credits;
        }
        self.amount_total.unwrap_or(0) / price_per_credit_cents.max(1)
    }
}

/// Verifies payment notifications and applies their top-ups.
#[derive(Clone)]
pub struct WebhookReconciler {
    accounting: AccountingEngine,
    secret: Option<String>,
    tolerance_secs: i64,
    price_per_credit_cents: u64,
}

impl WebhookReconciler {
    pub fn new(
        accounting: AccountingEngine,
        secret: Option<String>,
        tolerance_secs: i64,
        price_per_credit_cents: u64,
    ) -> Self {
        if secret.is_none() {
            warn!("PAYMENT_WEBHOOK_SECRET is not set, payment notifications will be rejected");
        }
        Self {
            accounting,
            secret,
            tolerance_secs,
            price_per_credit_cents,
        }
    }

    /// Verify the signature, then credit the purchase at most once.
    pub async fn handle(&self, signature: Option<&str>, payload: &[u8]) -> ApiResult<WebhookOutcome> {
        security::verify_webhook_signature(
            self.secret.as_deref(),
            signature,
            payload,
            chrono::Utc::now().timestamp(),
            self.tolerance_secs,
        )
        .map_err(|e: SignatureError| {
            warn!("Rejected payment notification: {}", e);
            ApiError::bad_request("Invalid signature")
        })?;

        let event: ProviderEvent = serde_json::from_slice(payload)
            .map_err(|e| ApiError::bad_request(format!("Invalid payload: {}", e)))?;

        let Some(payment) = self.payment_event(&event) else {
            return Ok(WebhookOutcome::Ignored);
        };

        self.apply(&payment).await
    }

    fn payment_event(&self, event: &ProviderEvent) -> Option<PaymentEvent> {
        if event.event_type != CHECKOUT_COMPLETED {
            info!(event_id = %event.id, event_type = %event.event_type, "Ignoring payment event");
            return None;
        }

        let session: CheckoutSession = match serde_json::from_value(event.data.object.clone()) {
            Ok(session) => session,
            Err(e) => {
                warn!(event_id = %event.id, "Unreadable checkout session: {}", e);
                return None;
            }
        };

        if session
            .payment_status
            .as_deref()
            .is_some_and(|status| status != "paid")
        {
            info!(event_id = %event.id, "Ignoring unpaid checkout session");
            return None;
        }

        let Some(user_id) = session.user_id() else {
            warn!(event_id = %event.id, "Checkout session has no user reference");
            return None;
        };

        let credit_amount = session.credits(self.price_per_credit_cents);
        if credit_amount == 0 {
            info!(event_id = %event.id, user_id = %user_id, "Checkout session buys no credits");
            return None;
        }

        Some(PaymentEvent {
            event_id: event.id.clone(),
            user_id,
            credit_amount,
        })
    }

    async fn apply(&self, payment: &PaymentEvent) -> ApiResult<WebhookOutcome> {
        let outcome = self
            .accounting
            .apply_topup(
                &idempotency::topup(&payment.event_id),
                &payment.user_id,
                payment.credit_amount,
            )
            .await?;

        Ok(match outcome {
            TopupOutcome::Applied { balance_after } => {
                info!(
                    event_id = %payment.event_id,
                    user_id = %payment.user_id,
                    credits = payment.credit_amount,
                    "Credited purchase"
                );
                WebhookOutcome::Credited { balance_after }
            }
            TopupOutcome::Duplicate => WebhookOutcome::Duplicate,
        })
    }
}
