use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Student-to-tutor inquiry stored in MongoDB "tutor_inquiries" collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorInquiry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Addressed tutor (ref: tutor_profiles)
    pub tutor_id: ObjectId,

    /// Asking student (ref: student_profiles)
    pub student_id: ObjectId,

    pub subject: String,

    pub message: String,

    pub status: InquiryStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    /// Minutes between creation and the tutor's reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_minutes: Option<i64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub replied_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InquiryStatus {
    Unread,
    Read,
    Replied,
    ConvertedToBooking,
}

/// Request body for POST /api/student/inquiries
#[derive(Debug, Deserialize, Validate)]
pub struct CreateInquiryRequest {
    pub tutor_id: String,

    #[validate(length(min = 1, max = 100, message = "Subject is required"))]
    pub subject: String,

    #[validate(length(min = 1, max = 4000, message = "Message is required"))]
    pub message: String,
}

/// Request body for PUT /api/tutor/inquiries/{id}/reply
#[derive(Debug, Deserialize, Validate)]
pub struct ReplyInquiryRequest {
    #[validate(length(min = 1, max = 4000, message = "Response is required"))]
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct InquiryResponse {
    pub id: String,
    pub tutor_id: String,
    pub student_id: String,
    pub subject: String,
    pub message: String,
    pub status: InquiryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&TutorInquiry> for InquiryResponse {
    fn from(inquiry: &TutorInquiry) -> Self {
        InquiryResponse {
            id: inquiry.id.map(|id| id.to_hex()).unwrap_or_default(),
            tutor_id: inquiry.tutor_id.to_hex(),
            student_id: inquiry.student_id.to_hex(),
            subject: inquiry.subject.clone(),
            message: inquiry.message.clone(),
            status: inquiry.status,
            response: inquiry.response.clone(),
            response_time_minutes: inquiry.response_time_minutes,
            replied_at: inquiry.replied_at,
            created_at: inquiry.created_at,
        }
    }
}
