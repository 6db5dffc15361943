use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::user::bson_datetime_as_chrono;

/// Tutor profile stored in MongoDB "tutor_profiles" collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorProfile {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Owning user (ref: users)
    pub user_id: ObjectId,

    #[serde(default)]
    pub subjects: Vec<String>,

    #[serde(default)]
    pub academic_levels_taught: Vec<AcademicLevelTaught>,

    /// Outcome of the admin vetting pipeline; only `approved` tutors can be
    /// hired or book sessions. Written by the admin service, read here.
    pub profile_status: TutorProfileStatus,

    #[serde(default)]
    pub is_background_checked: bool,

    /// Lifetime tutoring hours, reconciled on session completion.
    #[serde(default)]
    pub total_tutoring_hours: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

/// Per-level teaching terms: rate, discount and the monthly session cap
/// enforced by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcademicLevelTaught {
    /// Academic level (ref: education_levels)
    pub education_level: ObjectId,

    /// GBP per hour
    pub hourly_rate: f64,

    pub total_sessions_per_month: u32,

    /// Percentage discount applied to the monthly package
    #[serde(default)]
    pub discount: f64,

    /// Pre-computed monthly package price, kept in sync by settings updates
    pub monthly_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TutorProfileStatus {
    Pending,
    Approved,
    Rejected,
    Suspended,
}

impl TutorProfile {
    pub fn is_approved(&self) -> bool {
        self.profile_status == TutorProfileStatus::Approved
    }

    /// Teaching terms for a specific academic level, if the tutor offers it.
    pub fn level_taught(&self, education_level: &ObjectId) -> Option<&AcademicLevelTaught> {
        self.academic_levels_taught
            .iter()
            .find(|level| level.education_level == *education_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_level(level: ObjectId) -> TutorProfile {
        TutorProfile {
            id: Some(ObjectId::new()),
            user_id: ObjectId::new(),
            subjects: vec!["maths".to_string()],
            academic_levels_taught: vec![AcademicLevelTaught {
                education_level: level,
                hourly_rate: 20.0,
                total_sessions_per_month: 5,
                discount: 10.0,
                monthly_rate: 90.0,
            }],
            profile_status: TutorProfileStatus::Approved,
            is_background_checked: true,
            total_tutoring_hours: 0.0,
            average_rating: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn level_taught_finds_matching_entry() {
        let level = ObjectId::new();
        let profile = profile_with_level(level);
        assert_eq!(profile.level_taught(&level).unwrap().hourly_rate, 20.0);
        assert!(profile.level_taught(&ObjectId::new()).is_none());
    }

    #[test]
    fn only_approved_profiles_pass_the_gate() {
        let mut profile = profile_with_level(ObjectId::new());
        assert!(profile.is_approved());
        profile.profile_status = TutorProfileStatus::Pending;
        assert!(!profile.is_approved());
        profile.profile_status = TutorProfileStatus::Suspended;
        assert!(!profile.is_approved());
    }
}
