use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::bson_datetime_as_chrono;

/// Student profile stored in MongoDB "student_profiles" collection.
///
/// The hired_tutors array is the authoritative record of tutor-student
/// relationships; see `services::hire_service` for the mutation rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProfile {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Owning user (ref: users)
    pub user_id: ObjectId,

    /// Current academic level (ref: education_levels)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_level: Option<ObjectId>,

    #[serde(default)]
    pub preferred_subjects: Vec<String>,

    #[serde(default)]
    pub hired_tutors: Vec<HireRecord>,

    #[serde(default)]
    pub availability: Vec<AvailabilitySlot>,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

/// Embedded hire record: one relationship between this student and a tutor.
///
/// A tutor is authorized to book sessions for the student iff a record with
/// status `accepted` exists for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HireRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Hired tutor (ref: tutor_profiles)
    pub tutor_id: ObjectId,

    pub subject: String,

    /// Academic level the hire was requested for (ref: education_levels)
    pub academic_level_id: ObjectId,

    pub status: HireStatus,

    #[serde(with = "bson_datetime_as_chrono")]
    pub hired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HireStatus {
    Pending,
    Accepted,
    Rejected,
}

impl HireStatus {
    pub fn as_str(&self) -> &str {
        match self {
            HireStatus::Pending => "pending",
            HireStatus::Accepted => "accepted",
            HireStatus::Rejected => "rejected",
        }
    }
}

/// Weekly availability slot, kept as plain strings ("monday", "16:00").
/// Display-only; the scheduler does not enforce availability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub day: String,
    pub start_time: String,
    pub end_time: String,
}

/// Request body for POST /api/auth/tutors/sessions (hire request)
#[derive(Debug, Deserialize, Validate)]
pub struct HireRequestPayload {
    pub tutor_user_id: String,
    pub student_user_id: String,

    #[validate(length(min = 1, max = 100, message = "Subject is required"))]
    pub subject: String,

    pub academic_level_id: String,
}

/// Request body for PUT /api/auth/tutors/hire-requests/respond
#[derive(Debug, Deserialize)]
pub struct RespondHireRequest {
    pub student_profile_id: String,
    pub action: HireAction,
    /// Specific embedded record to act on; defaults to the tutor's first
    /// record on the profile when omitted.
    #[serde(default)]
    pub hire_record_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HireAction {
    Accept,
    Reject,
}

/// Hire record as returned to clients
#[derive(Debug, Serialize)]
pub struct HireRecordResponse {
    pub id: String,
    pub tutor_id: String,
    pub subject: String,
    pub academic_level_id: String,
    pub status: HireStatus,
    pub hired_at: DateTime<Utc>,
}

impl From<&HireRecord> for HireRecordResponse {
    fn from(record: &HireRecord) -> Self {
        HireRecordResponse {
            id: record.id.to_hex(),
            tutor_id: record.tutor_id.to_hex(),
            subject: record.subject.clone(),
            academic_level_id: record.academic_level_id.to_hex(),
            status: record.status,
            hired_at: record.hired_at,
        }
    }
}
