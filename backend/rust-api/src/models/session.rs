use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Tutoring session stored in MongoDB "tutoring_sessions" collection.
///
/// Scheduler invariants: `total_earnings == duration_hours * hourly_rate`,
/// and no two sessions of one tutor with an active status may overlap on
/// `[session_date, session_date + duration_hours)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutoringSession {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Owning tutor (ref: tutor_profiles)
    pub tutor_id: ObjectId,

    /// Participants (ref: student_profiles); usually one, group sessions allowed
    pub student_ids: Vec<ObjectId>,

    pub subject: String,

    /// Academic level (ref: education_levels)
    pub academic_level: ObjectId,

    #[serde(with = "bson_datetime_as_chrono")]
    pub session_date: DateTime<Utc>,

    pub duration_hours: f64,

    /// GBP per hour
    pub hourly_rate: f64,

    pub total_earnings: f64,

    pub status: SessionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Aggregate rating across student ratings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(default)]
    pub student_responses: Vec<StudentResponse>,

    #[serde(default)]
    pub student_ratings: Vec<StudentRating>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub student_proposed_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_proposed_status: Option<ProposalStatus>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub student_proposed_decided_at: Option<DateTime<Utc>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Active sessions block the tutor's calendar and count for conflicts.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::Confirmed | SessionStatus::InProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Confirmed => "confirmed",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Display label consumed by API responses.
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "Pending",
            SessionStatus::Confirmed => "Confirmed",
            SessionStatus::InProgress => "In progress",
            SessionStatus::Completed => "Completed",
            SessionStatus::Cancelled => "Cancelled",
        }
    }
}

/// Per-student confirm/decline, independent of the shared session status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentResponse {
    pub student_id: ObjectId,
    pub status: ResponseStatus,
    #[serde(with = "bson_datetime_as_chrono")]
    pub responded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Confirmed,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRating {
    pub student_id: ObjectId,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
}

impl TutoringSession {
    /// Status as one specific student sees it: a declined student sees the
    /// session as cancelled without the shared status changing.
    pub fn effective_status_for(&self, student_id: &ObjectId) -> SessionStatus {
        let declined = self
            .student_responses
            .iter()
            .any(|r| r.student_id == *student_id && r.status == ResponseStatus::Declined);
        if declined {
            SessionStatus::Cancelled
        } else {
            self.status
        }
    }

    pub fn includes_student(&self, student_id: &ObjectId) -> bool {
        self.student_ids.contains(student_id)
    }
}

/// Request body for POST /api/tutor/sessions
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    pub student_ids: Vec<String>,

    #[validate(length(min = 1, max = 100, message = "Subject is required"))]
    pub subject: String,

    pub academic_level: String,

    /// ISO-8601; a timestamp without timezone suffix is read as UTC
    pub session_date: String,

    #[validate(range(
        min = 0.25,
        max = 8.0,
        message = "Duration must be between 0.25 and 8 hours"
    ))]
    pub duration_hours: f64,

    #[validate(range(min = 0.01, message = "Hourly rate must be positive"))]
    pub hourly_rate: f64,

    #[validate(length(max = 2000, message = "Notes are limited to 2000 characters"))]
    pub notes: Option<String>,
}

/// Request body for PUT /api/tutor/sessions/update/{session_id}.
/// `session_date`, `duration_hours` and `hourly_rate` are always required
/// by the wire contract, even when unchanged.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSessionRequest {
    pub session_date: String,

    #[validate(range(
        min = 0.25,
        max = 8.0,
        message = "Duration must be between 0.25 and 8 hours"
    ))]
    pub duration_hours: f64,

    #[validate(range(min = 0.01, message = "Hourly rate must be positive"))]
    pub hourly_rate: f64,

    pub status: Option<SessionStatus>,

    #[validate(length(max = 2000, message = "Notes are limited to 2000 characters"))]
    pub notes: Option<String>,

    #[validate(range(min = 1.0, max = 5.0, message = "Rating must be between 1 and 5"))]
    pub rating: Option<f64>,

    #[validate(length(max = 2000, message = "Feedback is limited to 2000 characters"))]
    pub feedback: Option<String>,
}

/// Request body for POST /api/student/sessions/{id}/respond
#[derive(Debug, Deserialize)]
pub struct SessionResponseRequest {
    pub action: ResponseStatus,
}

/// Request body for POST /api/student/sessions/{id}/reschedule
#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    /// ISO-8601; naive timestamps are read as UTC
    pub proposed_date: String,
}

/// Request body for PUT /api/tutor/sessions/{id}/reschedule/decide
#[derive(Debug, Deserialize)]
pub struct DecideRescheduleRequest {
    pub action: ProposalDecision,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProposalDecision {
    Accept,
    Reject,
}

/// Request body for POST /api/student/sessions/{id}/rate
#[derive(Debug, Deserialize, Validate)]
pub struct RateSessionRequest {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: u8,

    #[validate(length(max = 2000, message = "Feedback is limited to 2000 characters"))]
    pub feedback: Option<String>,
}

/// Session as returned to clients
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub tutor_id: String,
    pub student_ids: Vec<String>,
    pub subject: String,
    pub academic_level: String,
    pub session_date: DateTime<Utc>,
    pub duration_hours: f64,
    pub hourly_rate: f64,
    pub total_earnings: f64,
    pub status: SessionStatus,
    pub status_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub student_responses: Vec<StudentResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_proposed_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_proposed_status: Option<ProposalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&TutoringSession> for SessionResponse {
    fn from(session: &TutoringSession) -> Self {
        SessionResponse {
            id: session.id.map(|id| id.to_hex()).unwrap_or_default(),
            tutor_id: session.tutor_id.to_hex(),
            student_ids: session.student_ids.iter().map(|id| id.to_hex()).collect(),
            subject: session.subject.clone(),
            academic_level: session.academic_level.to_hex(),
            session_date: session.session_date,
            duration_hours: session.duration_hours,
            hourly_rate: session.hourly_rate,
            total_earnings: session.total_earnings,
            status: session.status,
            status_label: session.status.label(),
            notes: session.notes.clone(),
            rating: session.rating,
            feedback: session.feedback.clone(),
            student_responses: session.student_responses.clone(),
            student_proposed_date: session.student_proposed_date,
            student_proposed_status: session.student_proposed_status,
            completed_at: session.completed_at,
            created_at: session.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_session(student: ObjectId) -> TutoringSession {
        TutoringSession {
            id: Some(ObjectId::new()),
            tutor_id: ObjectId::new(),
            student_ids: vec![student],
            subject: "maths".to_string(),
            academic_level: ObjectId::new(),
            session_date: Utc::now(),
            duration_hours: 1.0,
            hourly_rate: 20.0,
            total_earnings: 20.0,
            status: SessionStatus::Confirmed,
            notes: None,
            rating: None,
            feedback: None,
            student_responses: vec![],
            student_ratings: vec![],
            student_proposed_date: None,
            student_proposed_status: None,
            student_proposed_decided_at: None,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn active_statuses_block_the_calendar() {
        assert!(SessionStatus::Pending.is_active());
        assert!(SessionStatus::Confirmed.is_active());
        assert!(SessionStatus::InProgress.is_active());
        assert!(!SessionStatus::Completed.is_active());
        assert!(!SessionStatus::Cancelled.is_active());
    }

    #[test]
    fn status_labels() {
        assert_eq!(SessionStatus::InProgress.label(), "In progress");
        assert_eq!(SessionStatus::Pending.label(), "Pending");
        assert_eq!(SessionStatus::InProgress.as_str(), "in_progress");
    }

    #[test]
    fn declined_student_sees_cancelled_view() {
        let student = ObjectId::new();
        let mut session = base_session(student);
        session.student_responses.push(StudentResponse {
            student_id: student,
            status: ResponseStatus::Declined,
            responded_at: Utc::now(),
        });

        assert_eq!(
            session.effective_status_for(&student),
            SessionStatus::Cancelled
        );
        // shared status is untouched
        assert_eq!(session.status, SessionStatus::Confirmed);
    }

    #[test]
    fn other_students_see_shared_status() {
        let student = ObjectId::new();
        let other = ObjectId::new();
        let mut session = base_session(student);
        session.student_ids.push(other);
        session.student_responses.push(StudentResponse {
            student_id: student,
            status: ResponseStatus::Declined,
            responded_at: Utc::now(),
        });

        assert_eq!(
            session.effective_status_for(&other),
            SessionStatus::Confirmed
        );
    }
}
