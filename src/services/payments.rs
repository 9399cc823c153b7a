use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::errors::{AppError, AppResult};
use crate::models::{Booking, BookingStatus, PaymentMethod, PaymentStatus};
use crate::services::pricing::round_money;
use crate::services::store::BookingStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Initiated,
    Paid,
    Failed,
    Refunded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayPayment {
    pub id: String,
    pub status: GatewayStatus,
}

/// External payment processor. Amounts are in minor units (halalas for SAR).
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: serde_json::Value,
    ) -> anyhow::Result<GatewayPayment>;

    async fn verify_payment(&self, id: &str) -> anyhow::Result<GatewayPayment>;

    async fn refund(&self, id: &str, amount_minor: i64) -> anyhow::Result<GatewayPayment>;
}

pub struct HttpPaymentGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn read_payment(resp: reqwest::Response) -> anyhow::Result<GatewayPayment> {
        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse payment gateway response")?;

        if !status.is_success() {
            anyhow::bail!("payment gateway error ({}): {}", status, data);
        }

        serde_json::from_value(data).context("unexpected payment gateway response")
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_payment(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: serde_json::Value,
    ) -> anyhow::Result<GatewayPayment> {
        let resp = self
            .client
            .post(format!("{}/payments", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .json(&serde_json::json!({
                "amount": amount_minor,
                "currency": currency,
                "metadata": metadata,
            }))
            .send()
            .await
            .context("failed to call payment gateway")?;

        Self::read_payment(resp).await
    }

    async fn verify_payment(&self, id: &str) -> anyhow::Result<GatewayPayment> {
        let resp = self
            .client
            .get(format!("{}/payments/{id}", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .send()
            .await
            .context("failed to call payment gateway")?;

        Self::read_payment(resp).await
    }

    async fn refund(&self, id: &str, amount_minor: i64) -> anyhow::Result<GatewayPayment> {
        let resp = self
            .client
            .post(format!("{}/payments/{id}/refund", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .json(&serde_json::json!({ "amount": amount_minor }))
            .send()
            .await
            .context("failed to call payment gateway")?;

        Self::read_payment(resp).await
    }
}

/// Outcome of a payment reported by the gateway's webhook.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub booking_id: String,
    pub payment_id: String,
    pub status: GatewayStatus,
    pub amount_minor: Option<i64>,
}

pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (round_money(amount) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| AppError::InvalidRequest(format!("amount out of range: {amount}")))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    round_money(Decimal::new(minor, 2))
}

/// Check a base64 HMAC-SHA1 of the raw request body.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign_webhook_body(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    mac.update(body);
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Records payment results on bookings. The gateway does the money movement; this only keeps
/// the booking's payment sub-record in step with it.
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    bookings: Arc<dyn BookingStore>,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, bookings: Arc<dyn BookingStore>) -> Self {
        Self { gateway, bookings }
    }

    async fn load(&self, booking_id: &str) -> AppResult<Booking> {
        self.bookings
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))
    }

    pub async fn start_payment(&self, booking_id: &str, method: PaymentMethod) -> AppResult<Booking> {
        let booking = self.load(booking_id).await?;
        if booking.payment.status == PaymentStatus::Paid {
            return Err(AppError::InvalidRequest(format!(
                "booking {} is already paid",
                booking.booking_number
            )));
        }
        if !booking.status.is_active() {
            return Err(AppError::InvalidRequest(format!(
                "booking {} is {} and cannot be paid",
                booking.booking_number, booking.status
            )));
        }

        let amount_minor = to_minor_units(booking.pricing.total_amount)?;
        let payment = self
            .gateway
            .create_payment(
                amount_minor,
                &booking.pricing.currency,
                serde_json::json!({
                    "booking_id": booking.id,
                    "booking_number": booking.booking_number,
                }),
            )
            .await
            .map_err(|e| {
                tracing::warn!(booking_id, error = %e, "payment creation failed");
                AppError::Payment(format!("{e:#}"))
            })?;

        let transaction_id = payment.id.clone();
        let booking = self
            .bookings
            .modify_booking(
                booking_id,
                Box::new(move |b| {
                    b.payment.method = Some(method);
                    b.payment.transaction_id = Some(transaction_id);
                    b.payment.status = match payment.status {
                        GatewayStatus::Failed => PaymentStatus::Failed,
                        _ => PaymentStatus::Pending,
                    };
                    b.updated_at = now();
                    Ok(())
                }),
            )
            .await?;

        tracing::info!(
            booking_id,
            transaction_id = ?booking.payment.transaction_id,
            amount_minor,
            "payment started"
        );
        Ok(booking)
    }

    /// Apply a webhook result. The booking must carry the reported payment id as its
    /// transaction id; anything else is treated as not found. Events arriving after the payment
    /// settled (a repeated `paid`, a late `failed`, anything after a refund) change nothing.
    pub async fn apply_payment_event(&self, event: PaymentEvent) -> AppResult<Booking> {
        let PaymentEvent {
            booking_id,
            payment_id,
            status,
            amount_minor,
        } = event;

        let expected = payment_id.clone();
        let missing = booking_id.clone();
        let booking = self
            .bookings
            .modify_booking(
                &booking_id,
                Box::new(move |b| {
                    if b.payment.transaction_id.as_deref() != Some(expected.as_str()) {
                        return Err(AppError::BookingNotFound(format!(
                            "{missing} with payment {expected}"
                        )));
                    }
                    if is_stale(b.payment.status, status) {
                        tracing::info!(
                            booking_id = %b.id,
                            payment_status = b.payment.status.as_str(),
                            event = ?status,
                            "ignoring payment event for a settled payment"
                        );
                        return Ok(());
                    }
                    let at = now();
                    match status {
                        GatewayStatus::Paid => {
                            b.payment.status = PaymentStatus::Paid;
                            b.payment.paid_amount = amount_minor
                                .map(from_minor_units)
                                .unwrap_or(b.pricing.total_amount);
                            b.payment.paid_at = Some(at);
                            if b.status == BookingStatus::Pending {
                                b.transition(
                                    BookingStatus::Confirmed,
                                    "system",
                                    Some("payment confirmed".to_string()),
                                    at,
                                )?;
                            }
                        }
                        GatewayStatus::Failed => b.payment.status = PaymentStatus::Failed,
                        _ => {}
                    }
                    b.updated_at = at;
                    Ok(())
                }),
            )
            .await?;

        tracing::info!(
            booking_id = %booking.id,
            payment_id = %payment_id,
            payment_status = booking.payment.status.as_str(),
            "payment event applied"
        );
        Ok(booking)
    }

    pub async fn verify_payment(&self, booking_id: &str) -> AppResult<GatewayPayment> {
        let booking = self.load(booking_id).await?;
        let transaction_id = booking.payment.transaction_id.ok_or_else(|| {
            AppError::InvalidRequest(format!("no payment started for booking {booking_id}"))
        })?;

        self.gateway
            .verify_payment(&transaction_id)
            .await
            .map_err(|e| {
                tracing::warn!(booking_id, error = %e, "payment verification failed");
                AppError::Payment(format!("{e:#}"))
            })
    }

    /// Refund a paid booking, fully by default.
    pub async fn refund_payment(
        &self,
        booking_id: &str,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> AppResult<Booking> {
        let booking = self.load(booking_id).await?;
        if booking.payment.status != PaymentStatus::Paid {
            return Err(AppError::InvalidRequest(format!(
                "booking {} has not been paid",
                booking.booking_number
            )));
        }
        let paid = booking.payment.paid_amount;
        let amount = round_money(amount.unwrap_or(paid));
        if amount <= Decimal::ZERO || amount > paid {
            return Err(AppError::InvalidRequest(format!(
                "refund must be between 0 and {paid}, got {amount}"
            )));
        }
        let transaction_id = booking.payment.transaction_id.clone().ok_or_else(|| {
            AppError::InvalidRequest(format!("booking {booking_id} has no transaction"))
        })?;

        self.gateway
            .refund(&transaction_id, to_minor_units(amount)?)
            .await
            .map_err(|e| {
                tracing::warn!(booking_id, error = %e, "refund failed");
                AppError::Payment(format!("{e:#}"))
            })?;

        let booking = self
            .bookings
            .modify_booking(
                booking_id,
                Box::new(move |b| {
                    let at = now();
                    b.payment.status = PaymentStatus::Refunded;
                    b.payment.refund_amount = amount;
                    b.payment.refund_reason = reason;
                    b.payment.refunded_at = Some(at);
                    b.updated_at = at;
                    Ok(())
                }),
            )
            .await?;

        tracing::info!(booking_id, refund = %amount, "payment refunded");
        Ok(booking)
    }
}

/// Whether a gateway event would move a payment backwards.
fn is_stale(current: PaymentStatus, event: GatewayStatus) -> bool {
    matches!(event, GatewayStatus::Paid | GatewayStatus::Failed)
        && matches!(current, PaymentStatus::Paid | PaymentStatus::Refunded)
}
