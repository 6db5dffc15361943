use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;

use crate::error::ApiError;
use crate::metrics::INQUIRIES_TOTAL;
use crate::models::inquiry::{CreateInquiryRequest, ReplyInquiryRequest};
use crate::models::{InquiryStatus, StudentProfile, TutorInquiry, TutorProfile};
use crate::utils::time::chrono_to_bson;

const TUTOR_INQUIRIES: &str = "tutor_inquiries";
const TUTOR_PROFILES: &str = "tutor_profiles";
const STUDENT_PROFILES: &str = "student_profiles";

/// Inquiry desk: student questions to tutors with reply tracking and
/// response-time capture.
pub struct InquiryService {
    mongo: Database,
}

impl InquiryService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    pub async fn create_inquiry(
        &self,
        student_user_id: &ObjectId,
        req: &CreateInquiryRequest,
    ) -> Result<TutorInquiry, ApiError> {
        let profile = self
            .mongo
            .collection::<StudentProfile>(STUDENT_PROFILES)
            .find_one(doc! { "user_id": student_user_id })
            .await?
            .ok_or(ApiError::NotFound("student profile"))?;
        let student_id = profile.id.ok_or(ApiError::NotFound("student profile"))?;

        let tutor_id = ObjectId::parse_str(&req.tutor_id)
            .map_err(|_| ApiError::Validation("Invalid tutor_id: must be an ObjectId".to_string()))?;
        let tutor_exists = self
            .mongo
            .collection::<TutorProfile>(TUTOR_PROFILES)
            .find_one(doc! { "_id": tutor_id })
            .await?
            .is_some();
        if !tutor_exists {
            return Err(ApiError::NotFound("tutor profile"));
        }

        let now = Utc::now();
        let mut inquiry = TutorInquiry {
            id: None,
            tutor_id,
            student_id,
            subject: req.subject.clone(),
            message: req.message.clone(),
            status: InquiryStatus::Unread,
            response: None,
            response_time_minutes: None,
            replied_at: None,
            created_at: now,
            updated_at: now,
        };

        let result = self
            .mongo
            .collection::<TutorInquiry>(TUTOR_INQUIRIES)
            .insert_one(&inquiry)
            .await?;
        inquiry.id = result.inserted_id.as_object_id();

        INQUIRIES_TOTAL.with_label_values(&["created"]).inc();
        tracing::info!("Inquiry created: student={} tutor={}", student_id, tutor_id);
        Ok(inquiry)
    }

    pub async fn list_for_tutor(
        &self,
        tutor_user_id: &ObjectId,
    ) -> Result<Vec<TutorInquiry>, ApiError> {
        let tutor_id = self.resolve_tutor_id(tutor_user_id).await?;

        let mut cursor = self
            .mongo
            .collection::<TutorInquiry>(TUTOR_INQUIRIES)
            .find(doc! { "tutor_id": tutor_id })
            .sort(doc! { "createdAt": -1 })
            .await?;

        let mut inquiries = Vec::new();
        while let Some(inquiry) = cursor.try_next().await? {
            inquiries.push(inquiry);
        }
        Ok(inquiries)
    }

    pub async fn mark_read(
        &self,
        tutor_user_id: &ObjectId,
        inquiry_id: &ObjectId,
    ) -> Result<(), ApiError> {
        let tutor_id = self.resolve_tutor_id(tutor_user_id).await?;

        // unread -> read only; replied/converted inquiries keep their status
        self.mongo
            .collection::<TutorInquiry>(TUTOR_INQUIRIES)
            .update_one(
                doc! { "_id": inquiry_id, "tutor_id": tutor_id, "status": "unread" },
                doc! { "$set": {
                    "status": "read",
                    "updatedAt": chrono_to_bson(Utc::now()),
                } },
            )
            .await?;
        Ok(())
    }

    pub async fn reply(
        &self,
        tutor_user_id: &ObjectId,
        inquiry_id: &ObjectId,
        req: &ReplyInquiryRequest,
    ) -> Result<TutorInquiry, ApiError> {
        let tutor_id = self.resolve_tutor_id(tutor_user_id).await?;

        let collection = self.mongo.collection::<TutorInquiry>(TUTOR_INQUIRIES);
        let inquiry = collection
            .find_one(doc! { "_id": inquiry_id })
            .await?
            .ok_or(ApiError::NotFound("inquiry"))?;

        if inquiry.tutor_id != tutor_id {
            return Err(ApiError::Forbidden(
                "You can only reply to your own inquiries".to_string(),
            ));
        }
        if inquiry.status == InquiryStatus::Replied {
            return Err(ApiError::AlreadyProcessed(
                "This inquiry has already been replied to".to_string(),
            ));
        }

        let now = Utc::now();
        collection
            .update_one(
                doc! { "_id": inquiry_id },
                doc! { "$set": {
                    "status": "replied",
                    "response": &req.response,
                    "response_time_minutes": response_time_minutes(inquiry.created_at, now),
                    "replied_at": chrono_to_bson(now),
                    "updatedAt": chrono_to_bson(now),
                } },
            )
            .await?;

        INQUIRIES_TOTAL.with_label_values(&["replied"]).inc();

        collection
            .find_one(doc! { "_id": inquiry_id })
            .await?
            .ok_or(ApiError::NotFound("inquiry"))
    }

    /// Mark an inquiry as having led to a booked session.
    pub async fn convert_to_booking(
        &self,
        tutor_user_id: &ObjectId,
        inquiry_id: &ObjectId,
    ) -> Result<(), ApiError> {
        let tutor_id = self.resolve_tutor_id(tutor_user_id).await?;

        let result = self
            .mongo
            .collection::<TutorInquiry>(TUTOR_INQUIRIES)
            .update_one(
                doc! { "_id": inquiry_id, "tutor_id": tutor_id },
                doc! { "$set": {
                    "status": "converted_to_booking",
                    "updatedAt": chrono_to_bson(Utc::now()),
                } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(ApiError::NotFound("inquiry"));
        }
        INQUIRIES_TOTAL.with_label_values(&["converted"]).inc();
        Ok(())
    }

    async fn resolve_tutor_id(&self, tutor_user_id: &ObjectId) -> Result<ObjectId, ApiError> {
        let tutor = self
            .mongo
            .collection::<TutorProfile>(TUTOR_PROFILES)
            .find_one(doc! { "user_id": tutor_user_id })
            .await?
            .ok_or(ApiError::NotFound("tutor profile"))?;
        tutor.id.ok_or(ApiError::NotFound("tutor profile"))
    }
}

/// Whole minutes between inquiry creation and reply.
pub fn response_time_minutes(created_at: DateTime<Utc>, replied_at: DateTime<Utc>) -> i64 {
    (replied_at - created_at).num_minutes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn response_time_is_whole_minutes() {
        let created = Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap();
        let replied = Utc.with_ymd_and_hms(2025, 8, 15, 9, 42, 30).unwrap();
        assert_eq!(response_time_minutes(created, replied), 42);
    }

    #[test]
    fn immediate_reply_is_zero_minutes() {
        let created = Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap();
        let replied = created + chrono::Duration::seconds(59);
        assert_eq!(response_time_minutes(created, replied), 0);
    }

    #[test]
    fn multi_day_response_times_accumulate() {
        let created = Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap();
        let replied = Utc.with_ymd_and_hms(2025, 8, 16, 9, 0, 0).unwrap();
        assert_eq!(response_time_minutes(created, replied), 24 * 60);
    }
}
