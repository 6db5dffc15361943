use chrono::{Duration, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;

use crate::error::ApiError;
use crate::metrics::PAYMENTS_TOTAL;
use crate::models::payment::PaymentStatusEntry;
use crate::models::{
    HireStatus, PaymentStatus, PaymentType, StudentPayment, StudentProfile, TutorProfile,
    ValidityStatus,
};
use crate::utils::time::chrono_to_bson;

const STUDENT_PAYMENTS: &str = "student_payments";
const TUTOR_PROFILES: &str = "tutor_profiles";

/// Access window bought by one payment, in days.
const VALIDITY_WINDOW_DAYS: i64 = 30;

/// Payment/access ledger: one StudentPayment per purchased access window for
/// (student, tutor, subject, academic level). Confirmation arrives via the
/// gateway webhook; expiry and exhaustion self-heal on read.
pub struct PaymentService {
    mongo: Database,
}

impl PaymentService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Create a pending ledger row for a checkout. Pricing comes from the
    /// tutor's teaching terms for the requested level.
    pub async fn request_payment(
        &self,
        student_id: ObjectId,
        tutor_id: ObjectId,
        subject: &str,
        academic_level_id: ObjectId,
        payment_type: PaymentType,
    ) -> Result<StudentPayment, ApiError> {
        let tutor = self
            .mongo
            .collection::<TutorProfile>(TUTOR_PROFILES)
            .find_one(doc! { "_id": tutor_id })
            .await?
            .ok_or(ApiError::NotFound("tutor profile"))?;

        let level = tutor
            .level_taught(&academic_level_id)
            .ok_or_else(|| {
                ApiError::Validation("Tutor does not teach this academic level".to_string())
            })?;

        let now = Utc::now();
        let amount = compute_package_amount(
            payment_type,
            level.hourly_rate,
            level.total_sessions_per_month,
            level.discount,
        );

        let mut payment = StudentPayment {
            id: None,
            student_id,
            tutor_id,
            subject: subject.to_string(),
            academic_level_id,
            payment_type,
            base_amount: level.hourly_rate,
            monthly_amount: amount,
            discount_percentage: level.discount,
            total_sessions_per_month: level.total_sessions_per_month,
            validity_start_date: None,
            validity_end_date: None,
            sessions_remaining: 0,
            payment_status: PaymentStatus::Pending,
            validity_status: ValidityStatus::Pending,
            academic_level_paid: false,
            is_active: false,
            gateway_session_id: None,
            payment_date: None,
            created_at: now,
            updated_at: now,
        };

        let result = self
            .mongo
            .collection::<StudentPayment>(STUDENT_PAYMENTS)
            .insert_one(&payment)
            .await?;
        payment.id = result.inserted_id.as_object_id();

        PAYMENTS_TOTAL.with_label_values(&["requested"]).inc();
        tracing::info!(
            "Payment requested: student={} tutor={} subject={} amount={}",
            student_id,
            tutor_id,
            subject,
            amount
        );

        Ok(payment)
    }

    /// Attach the gateway checkout session id after checkout creation.
    pub async fn attach_gateway_session(
        &self,
        payment_id: &ObjectId,
        gateway_session_id: &str,
    ) -> Result<(), ApiError> {
        self.mongo
            .collection::<StudentPayment>(STUDENT_PAYMENTS)
            .update_one(
                doc! { "_id": payment_id },
                doc! { "$set": {
                    "gateway_session_id": gateway_session_id,
                    "updatedAt": chrono_to_bson(Utc::now()),
                } },
            )
            .await?;
        Ok(())
    }

    /// Gateway confirmation: open the 30-day access window and arm the
    /// session quota. Conditional on the pending state so a replayed webhook
    /// is rejected instead of re-opening the window.
    pub async fn confirm_payment(&self, payment_id: &ObjectId) -> Result<StudentPayment, ApiError> {
        let collection = self.mongo.collection::<StudentPayment>(STUDENT_PAYMENTS);

        let payment = collection
            .find_one(doc! { "_id": payment_id })
            .await?
            .ok_or(ApiError::NotFound("payment"))?;

        let now = Utc::now();
        let result = collection
            .update_one(
                doc! { "_id": payment_id, "payment_status": "pending" },
                doc! { "$set": {
                    "payment_status": "paid",
                    "validity_status": "active",
                    "academic_level_paid": true,
                    "is_active": true,
                    "payment_date": chrono_to_bson(now),
                    "validity_start_date": chrono_to_bson(now),
                    "validity_end_date": chrono_to_bson(now + Duration::days(VALIDITY_WINDOW_DAYS)),
                    "sessions_remaining": payment.total_sessions_per_month,
                    "updatedAt": chrono_to_bson(now),
                } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(ApiError::AlreadyProcessed(
                "Payment has already been processed".to_string(),
            ));
        }

        PAYMENTS_TOTAL.with_label_values(&["confirmed"]).inc();
        tracing::info!("Payment confirmed: {}", payment_id);

        collection
            .find_one(doc! { "_id": payment_id })
            .await?
            .ok_or(ApiError::NotFound("payment"))
    }

    /// Gateway failure event for a pending payment.
    pub async fn mark_failed(&self, payment_id: &ObjectId) -> Result<(), ApiError> {
        let result = self
            .mongo
            .collection::<StudentPayment>(STUDENT_PAYMENTS)
            .update_one(
                doc! { "_id": payment_id, "payment_status": "pending" },
                doc! { "$set": {
                    "payment_status": "failed",
                    "updatedAt": chrono_to_bson(Utc::now()),
                } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(ApiError::AlreadyProcessed(
                "Payment has already been processed".to_string(),
            ));
        }

        PAYMENTS_TOTAL.with_label_values(&["failed"]).inc();
        tracing::warn!("Payment failed: {}", payment_id);
        Ok(())
    }

    /// First valid access window for the exact tuple, healing stale records
    /// on the way.
    pub async fn find_valid_payment(
        &self,
        student_id: &ObjectId,
        tutor_id: &ObjectId,
        subject: &str,
        academic_level_id: &ObjectId,
    ) -> Result<Option<StudentPayment>, ApiError> {
        let collection = self.mongo.collection::<StudentPayment>(STUDENT_PAYMENTS);
        let mut cursor = collection
            .find(doc! {
                "student_id": student_id,
                "tutor_id": tutor_id,
                "subject": subject,
                "academic_level_id": academic_level_id,
                "is_active": true,
            })
            .await?;

        while let Some(payment) = cursor.try_next().await? {
            if self.check_and_heal(&payment).await? {
                return Ok(Some(payment));
            }
        }

        Ok(None)
    }

    /// Evaluate the validity predicate; flip exhausted or out-of-window
    /// records to expired. The healing write is conditioned on the active
    /// state, so concurrent reads cannot double-expire a record.
    pub async fn check_and_heal(&self, payment: &StudentPayment) -> Result<bool, ApiError> {
        let now = Utc::now();
        if payment.is_valid(now) {
            return Ok(true);
        }

        if payment.needs_expiry(now) {
            let payment_id = payment.id.ok_or(ApiError::NotFound("payment"))?;
            self.mongo
                .collection::<StudentPayment>(STUDENT_PAYMENTS)
                .update_one(
                    doc! { "_id": payment_id, "validity_status": "active" },
                    doc! { "$set": {
                        "validity_status": "expired",
                        "is_active": false,
                        "academic_level_paid": false,
                        "updatedAt": chrono_to_bson(now),
                    } },
                )
                .await?;
            PAYMENTS_TOTAL.with_label_values(&["expired"]).inc();
            tracing::info!("Payment expired on read: {}", payment_id);
        }

        Ok(false)
    }

    /// Consume one session from the window. The `$inc` is conditioned on
    /// sessions remaining, so concurrent bookings cannot oversell.
    pub async fn consume_session(&self, payment_id: &ObjectId) -> Result<bool, ApiError> {
        let result = self
            .mongo
            .collection::<StudentPayment>(STUDENT_PAYMENTS)
            .update_one(
                doc! { "_id": payment_id, "sessions_remaining": { "$gt": 0 } },
                doc! {
                    "$inc": { "sessions_remaining": -1 },
                    "$set": { "updatedAt": chrono_to_bson(Utc::now()) },
                },
            )
            .await?;

        Ok(result.modified_count > 0)
    }

    /// Dashboard view: which of the student's accepted hires currently lack
    /// a valid payment.
    pub async fn payment_status_for_student(
        &self,
        profile: &StudentProfile,
    ) -> Result<Vec<PaymentStatusEntry>, ApiError> {
        let student_id = profile.id.ok_or(ApiError::NotFound("student profile"))?;
        let mut entries = Vec::new();

        for record in &profile.hired_tutors {
            if record.status != HireStatus::Accepted {
                continue;
            }
            let payment = self
                .find_valid_payment(
                    &student_id,
                    &record.tutor_id,
                    &record.subject,
                    &record.academic_level_id,
                )
                .await?;

            entries.push(PaymentStatusEntry {
                tutor_id: record.tutor_id.to_hex(),
                subject: record.subject.clone(),
                academic_level_id: record.academic_level_id.to_hex(),
                payment_required: payment.is_none(),
                validity_end_date: payment.as_ref().and_then(|p| p.validity_end_date),
                sessions_remaining: payment.as_ref().map(|p| p.sessions_remaining),
            });
        }

        Ok(entries)
    }

    pub async fn find_payment(&self, payment_id: &ObjectId) -> Result<StudentPayment, ApiError> {
        self.mongo
            .collection::<StudentPayment>(STUDENT_PAYMENTS)
            .find_one(doc! { "_id": payment_id })
            .await?
            .ok_or(ApiError::NotFound("payment"))
    }
}

/// Package price: the monthly package is the per-session rate times the
/// session quota, minus the tutor's discount; hourly access is billed at
/// the bare hourly rate.
pub fn compute_package_amount(
    payment_type: PaymentType,
    hourly_rate: f64,
    sessions_per_month: u32,
    discount_percentage: f64,
) -> f64 {
    match payment_type {
        PaymentType::Monthly => {
            hourly_rate * sessions_per_month as f64 * (1.0 - discount_percentage / 100.0)
        }
        PaymentType::Hourly => hourly_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_package_applies_discount() {
        let amount = compute_package_amount(PaymentType::Monthly, 20.0, 5, 10.0);
        assert!((amount - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn monthly_package_without_discount() {
        let amount = compute_package_amount(PaymentType::Monthly, 20.0, 4, 0.0);
        assert!((amount - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hourly_access_is_billed_at_base_rate() {
        let amount = compute_package_amount(PaymentType::Hourly, 35.5, 8, 25.0);
        assert!((amount - 35.5).abs() < f64::EPSILON);
    }
}
