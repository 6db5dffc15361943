use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// One purchased access window for (student, tutor, subject, academic level),
/// stored in MongoDB "student_payments" collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentPayment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Paying student (ref: student_profiles)
    pub student_id: ObjectId,

    /// Tutor the access is bought for (ref: tutor_profiles)
    pub tutor_id: ObjectId,

    pub subject: String,

    /// Academic level (ref: education_levels)
    pub academic_level_id: ObjectId,

    pub payment_type: PaymentType,

    /// Hourly rate the package was priced from, GBP
    pub base_amount: f64,

    /// Total charged for the access window, GBP
    pub monthly_amount: f64,

    #[serde(default)]
    pub discount_percentage: f64,

    pub total_sessions_per_month: u32,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub validity_start_date: Option<DateTime<Utc>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub validity_end_date: Option<DateTime<Utc>>,

    pub sessions_remaining: u32,

    pub payment_status: PaymentStatus,

    pub validity_status: ValidityStatus,

    /// Gate consumed by student dashboards and (optionally) the scheduler
    pub academic_level_paid: bool,

    pub is_active: bool,

    /// Checkout session id issued by the payment gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_session_id: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub payment_date: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Monthly,
    Hourly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidityStatus {
    Pending,
    Active,
    Expired,
}

impl StudentPayment {
    /// The access-window predicate: active, paid, inside the validity window
    /// and with sessions left. `now` is injected so the rule is testable.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.payment_status == PaymentStatus::Paid
            && self.validity_status == ValidityStatus::Active
            && self.validity_end_date.map(|end| now < end).unwrap_or(false)
            && self.sessions_remaining > 0
    }

    /// True when an active record has run out of time or sessions and must
    /// be flipped to expired on the next ledger read.
    pub fn needs_expiry(&self, now: DateTime<Utc>) -> bool {
        self.validity_status == ValidityStatus::Active
            && (self.sessions_remaining == 0
                || self.validity_end_date.map(|end| now >= end).unwrap_or(true))
    }
}

/// Request body for POST /api/payment/create-checkout-session
#[derive(Debug, Deserialize, Validate)]
pub struct RequestPaymentRequest {
    pub tutor_id: String,

    #[validate(length(min = 1, max = 100, message = "Subject is required"))]
    pub subject: String,

    pub academic_level_id: String,

    pub payment_type: PaymentType,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub payment_id: String,
    pub checkout_url: String,
    pub amount: f64,
}

/// One row of GET /api/auth/student/payment-status/{user_id}: whether the
/// (tutor, subject, level) tuple currently lacks a valid payment.
#[derive(Debug, Serialize)]
pub struct PaymentStatusEntry {
    pub tutor_id: String,
    pub subject: String,
    pub academic_level_id: String,
    pub payment_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity_end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_remaining: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn paid_payment(now: DateTime<Utc>) -> StudentPayment {
        StudentPayment {
            id: Some(ObjectId::new()),
            student_id: ObjectId::new(),
            tutor_id: ObjectId::new(),
            subject: "maths".to_string(),
            academic_level_id: ObjectId::new(),
            payment_type: PaymentType::Monthly,
            base_amount: 20.0,
            monthly_amount: 90.0,
            discount_percentage: 10.0,
            total_sessions_per_month: 5,
            validity_start_date: Some(now - Duration::days(1)),
            validity_end_date: Some(now + Duration::days(29)),
            sessions_remaining: 5,
            payment_status: PaymentStatus::Paid,
            validity_status: ValidityStatus::Active,
            academic_level_paid: true,
            is_active: true,
            gateway_session_id: Some("cs_test_123".to_string()),
            payment_date: Some(now - Duration::days(1)),
            created_at: now - Duration::days(1),
            updated_at: now - Duration::days(1),
        }
    }

    #[test]
    fn fresh_paid_window_is_valid() {
        let now = Utc::now();
        assert!(paid_payment(now).is_valid(now));
    }

    #[test]
    fn pending_payment_is_not_valid() {
        let now = Utc::now();
        let mut payment = paid_payment(now);
        payment.payment_status = PaymentStatus::Pending;
        assert!(!payment.is_valid(now));
    }

    #[test]
    fn exhausted_window_is_not_valid_and_needs_expiry() {
        let now = Utc::now();
        let mut payment = paid_payment(now);
        payment.sessions_remaining = 0;
        assert!(!payment.is_valid(now));
        assert!(payment.needs_expiry(now));
    }

    #[test]
    fn past_end_date_is_not_valid_and_needs_expiry() {
        let now = Utc::now();
        let mut payment = paid_payment(now);
        payment.validity_end_date = Some(now - Duration::hours(1));
        assert!(!payment.is_valid(now));
        assert!(payment.needs_expiry(now));
    }

    #[test]
    fn expired_record_does_not_need_expiry_again() {
        let now = Utc::now();
        let mut payment = paid_payment(now);
        payment.sessions_remaining = 0;
        payment.validity_status = ValidityStatus::Expired;
        payment.is_active = false;
        payment.academic_level_paid = false;
        assert!(!payment.is_valid(now));
        assert!(!payment.needs_expiry(now));
    }

    #[test]
    fn inactive_record_is_not_valid() {
        let now = Utc::now();
        let mut payment = paid_payment(now);
        payment.is_active = false;
        assert!(!payment.is_valid(now));
    }

    #[test]
    fn missing_window_dates_are_not_valid() {
        let now = Utc::now();
        let mut payment = paid_payment(now);
        payment.validity_end_date = None;
        assert!(!payment.is_valid(now));
    }
}
