use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use mongodb::options::UpdateOptions;
use mongodb::Database;

use crate::error::ApiError;
use crate::metrics::HIRE_REQUESTS_TOTAL;
use crate::models::student::{HireAction, HireRequestPayload, RespondHireRequest};
use crate::models::{HireRecord, HireStatus, StudentProfile, TutorProfile, User, UserRole};
use crate::utils::time::chrono_to_bson;

const USERS: &str = "users";
const STUDENT_PROFILES: &str = "student_profiles";
const TUTOR_PROFILES: &str = "tutor_profiles";

/// Hire-request state machine over the hired_tutors embedded array:
/// pending -> accepted | rejected, rejected -> pending (resubmission).
/// All mutations are single document writes; resubmission uses a
/// conditional filter so concurrent resubmits cannot interleave.
pub struct HireService {
    mongo: Database,
}

/// What `request_hire` should do given the student's existing records.
#[derive(Debug, PartialEq, Eq)]
enum HireDecision {
    AlreadyHired,
    AlreadyPending,
    Resubmit,
    Fresh,
}

impl HireService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    pub async fn request_hire(&self, req: &HireRequestPayload) -> Result<HireRecord, ApiError> {
        let tutor_user_id = parse_object_id(&req.tutor_user_id, "tutor_user_id")?;
        let student_user_id = parse_object_id(&req.student_user_id, "student_user_id")?;
        let academic_level_id = parse_object_id(&req.academic_level_id, "academic_level_id")?;

        // Identity checks against the users collection (written by the
        // external auth/admin services, consumed read-only here)
        let tutor_user = self
            .mongo
            .collection::<User>(USERS)
            .find_one(doc! { "_id": tutor_user_id })
            .await?
            .ok_or(ApiError::NotFound("user"))?;
        if tutor_user.role != UserRole::Tutor {
            return Err(ApiError::Validation(
                "Target user is not a tutor".to_string(),
            ));
        }
        if tutor_user.is_blocked {
            return Err(ApiError::Forbidden(
                "This tutor account is blocked".to_string(),
            ));
        }

        let tutor = self.find_tutor_by_user(&tutor_user_id).await?;
        if !tutor.is_approved() {
            return Err(ApiError::Forbidden(
                "This tutor has not been approved yet".to_string(),
            ));
        }
        let tutor_id = tutor.id.ok_or(ApiError::NotFound("tutor profile"))?;

        let profile = self.find_student_by_user(&student_user_id).await?;
        let profile_id = profile.id.ok_or(ApiError::NotFound("student profile"))?;

        let now = Utc::now();
        match hire_decision(&profile.hired_tutors, &tutor_id) {
            HireDecision::AlreadyHired => {
                HIRE_REQUESTS_TOTAL.with_label_values(&["already_hired"]).inc();
                Err(ApiError::AlreadyProcessed(
                    "You have already hired this tutor".to_string(),
                ))
            }
            HireDecision::AlreadyPending => {
                HIRE_REQUESTS_TOTAL.with_label_values(&["already_pending"]).inc();
                Err(ApiError::AlreadyProcessed(
                    "A hire request for this tutor is already pending".to_string(),
                ))
            }
            HireDecision::Fresh => {
                let record = HireRecord {
                    id: ObjectId::new(),
                    tutor_id,
                    subject: req.subject.clone(),
                    academic_level_id,
                    status: HireStatus::Pending,
                    hired_at: now,
                };

                let collection = self.mongo.collection::<StudentProfile>(STUDENT_PROFILES);
                collection
                    .update_one(
                        doc! { "_id": profile_id },
                        doc! {
                            "$push": { "hired_tutors": to_bson(&record).map_err(anyhow::Error::from)? },
                            "$set": { "updatedAt": chrono_to_bson(now) },
                        },
                    )
                    .await?;

                HIRE_REQUESTS_TOTAL.with_label_values(&["requested"]).inc();
                tracing::info!(
                    "Hire requested: student={} tutor={} subject={}",
                    student_user_id,
                    tutor_id,
                    req.subject
                );
                Ok(record)
            }
            HireDecision::Resubmit => {
                let rebuilt = rebuild_for_resubmission(
                    &profile.hired_tutors,
                    &tutor_id,
                    &req.subject,
                    &academic_level_id,
                    now,
                );
                let resubmitted = rebuilt
                    .iter()
                    .find(|r| r.tutor_id == tutor_id)
                    .cloned()
                    .ok_or_else(|| {
                        ApiError::Internal(anyhow::anyhow!("resubmission lost the hire record"))
                    })?;

                // One conditional write: the filter pins the rejected state so
                // a concurrent resubmission loses the race instead of
                // duplicating the record.
                let collection = self.mongo.collection::<StudentProfile>(STUDENT_PROFILES);
                let result = collection
                    .update_one(
                        doc! {
                            "_id": profile_id,
                            "hired_tutors": {
                                "$elemMatch": { "tutor_id": tutor_id, "status": "rejected" }
                            },
                        },
                        doc! {
                            "$set": {
                                "hired_tutors": to_bson(&rebuilt).map_err(anyhow::Error::from)?,
                                "updatedAt": chrono_to_bson(now),
                            },
                        },
                    )
                    .await?;

                if result.matched_count == 0 {
                    return Err(ApiError::AlreadyProcessed(
                        "Hire request was updated concurrently, please retry".to_string(),
                    ));
                }

                HIRE_REQUESTS_TOTAL.with_label_values(&["resubmitted"]).inc();
                tracing::info!(
                    "Hire resubmitted: student={} tutor={}",
                    student_user_id,
                    tutor_id
                );
                Ok(resubmitted)
            }
        }
    }

    /// Accept or reject a pending hire request. Re-deciding an already
    /// processed request is allowed and simply overwrites the status.
    pub async fn respond_to_hire(
        &self,
        tutor_user_id: &ObjectId,
        req: &RespondHireRequest,
    ) -> Result<HireRecord, ApiError> {
        let tutor = self.find_tutor_by_user(tutor_user_id).await?;
        let tutor_id = tutor.id.ok_or(ApiError::NotFound("tutor profile"))?;

        let profile_id = parse_object_id(&req.student_profile_id, "student_profile_id")?;
        let collection = self.mongo.collection::<StudentProfile>(STUDENT_PROFILES);
        let profile = collection
            .find_one(doc! { "_id": profile_id })
            .await?
            .ok_or(ApiError::NotFound("student profile"))?;

        let record = match &req.hire_record_id {
            Some(record_id) => {
                let record_id = parse_object_id(record_id, "hire_record_id")?;
                profile
                    .hired_tutors
                    .iter()
                    .find(|r| r.id == record_id)
                    .ok_or(ApiError::NotFound("hire request"))?
            }
            None => profile
                .hired_tutors
                .iter()
                .find(|r| r.tutor_id == tutor_id)
                .ok_or(ApiError::NotFound("hire request"))?,
        };

        if record.tutor_id != tutor_id {
            return Err(ApiError::Forbidden(
                "This hire request belongs to another tutor".to_string(),
            ));
        }

        let new_status = match req.action {
            HireAction::Accept => HireStatus::Accepted,
            HireAction::Reject => HireStatus::Rejected,
        };

        let now = Utc::now();
        collection
            .update_one(
                doc! { "_id": profile_id },
                doc! {
                    "$set": {
                        "hired_tutors.$[rec].status": new_status.as_str(),
                        "updatedAt": chrono_to_bson(now),
                    },
                },
            )
            .with_options(
                UpdateOptions::builder()
                    .array_filters(vec![doc! { "rec._id": record.id }])
                    .build(),
            )
            .await?;

        let outcome = match new_status {
            HireStatus::Accepted => "accepted",
            HireStatus::Rejected => "rejected",
            HireStatus::Pending => "pending",
        };
        HIRE_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
        tracing::info!(
            "Hire request {}: tutor={} student_profile={}",
            outcome,
            tutor_id,
            profile_id
        );

        let mut updated = record.clone();
        updated.status = new_status;
        Ok(updated)
    }

    pub async fn find_tutor_by_user(&self, user_id: &ObjectId) -> Result<TutorProfile, ApiError> {
        self.mongo
            .collection::<TutorProfile>(TUTOR_PROFILES)
            .find_one(doc! { "user_id": user_id })
            .await?
            .ok_or(ApiError::NotFound("tutor profile"))
    }

    pub async fn find_student_by_user(
        &self,
        user_id: &ObjectId,
    ) -> Result<StudentProfile, ApiError> {
        self.mongo
            .collection::<StudentProfile>(STUDENT_PROFILES)
            .find_one(doc! { "user_id": user_id })
            .await?
            .ok_or(ApiError::NotFound("student profile"))
    }
}

/// Authorization gate consumed by the session scheduler.
pub fn is_authorized(profile: &StudentProfile, tutor_id: &ObjectId) -> bool {
    profile
        .hired_tutors
        .iter()
        .any(|r| r.tutor_id == *tutor_id && r.status == HireStatus::Accepted)
}

fn hire_decision(records: &[HireRecord], tutor_id: &ObjectId) -> HireDecision {
    let for_tutor: Vec<&HireRecord> = records.iter().filter(|r| r.tutor_id == *tutor_id).collect();

    if for_tutor.iter().any(|r| r.status == HireStatus::Accepted) {
        HireDecision::AlreadyHired
    } else if for_tutor.iter().any(|r| r.status == HireStatus::Pending) {
        HireDecision::AlreadyPending
    } else if !for_tutor.is_empty() {
        HireDecision::Resubmit
    } else {
        HireDecision::Fresh
    }
}

/// Flip the tutor's rejected record back to pending and drop any duplicate
/// records for the same tutor. Records for other tutors pass through.
fn rebuild_for_resubmission(
    records: &[HireRecord],
    tutor_id: &ObjectId,
    subject: &str,
    academic_level_id: &ObjectId,
    now: DateTime<Utc>,
) -> Vec<HireRecord> {
    let mut rebuilt = Vec::with_capacity(records.len());
    let mut kept_for_tutor = false;

    for record in records {
        if record.tutor_id != *tutor_id {
            rebuilt.push(record.clone());
            continue;
        }
        if kept_for_tutor {
            // duplicate left over from earlier buggy writes; prune it
            continue;
        }
        let mut flipped = record.clone();
        flipped.status = HireStatus::Pending;
        flipped.subject = subject.to_string();
        flipped.academic_level_id = *academic_level_id;
        flipped.hired_at = now;
        rebuilt.push(flipped);
        kept_for_tutor = true;
    }

    rebuilt
}

fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value)
        .map_err(|_| ApiError::Validation(format!("Invalid {}: must be an ObjectId", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tutor_id: ObjectId, status: HireStatus) -> HireRecord {
        HireRecord {
            id: ObjectId::new(),
            tutor_id,
            subject: "maths".to_string(),
            academic_level_id: ObjectId::new(),
            status,
            hired_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_request_when_no_records_exist() {
        let tutor = ObjectId::new();
        assert_eq!(hire_decision(&[], &tutor), HireDecision::Fresh);

        let other = record(ObjectId::new(), HireStatus::Accepted);
        assert_eq!(hire_decision(&[other], &tutor), HireDecision::Fresh);
    }

    #[test]
    fn accepted_record_wins_over_leftover_duplicates() {
        let tutor = ObjectId::new();
        let records = vec![
            record(tutor, HireStatus::Rejected),
            record(tutor, HireStatus::Accepted),
        ];
        assert_eq!(hire_decision(&records, &tutor), HireDecision::AlreadyHired);
    }

    #[test]
    fn pending_record_blocks_a_second_request() {
        let tutor = ObjectId::new();
        let records = vec![record(tutor, HireStatus::Pending)];
        assert_eq!(hire_decision(&records, &tutor), HireDecision::AlreadyPending);
    }

    #[test]
    fn rejected_record_triggers_resubmission() {
        let tutor = ObjectId::new();
        let records = vec![record(tutor, HireStatus::Rejected)];
        assert_eq!(hire_decision(&records, &tutor), HireDecision::Resubmit);
    }

    #[test]
    fn resubmission_flips_in_place_and_prunes_duplicates() {
        let tutor = ObjectId::new();
        let other_tutor = ObjectId::new();
        let level = ObjectId::new();
        let records = vec![
            record(other_tutor, HireStatus::Accepted),
            record(tutor, HireStatus::Rejected),
            record(tutor, HireStatus::Rejected),
        ];

        let rebuilt = rebuild_for_resubmission(&records, &tutor, "physics", &level, Utc::now());

        // one record per tutor, the other tutor untouched
        assert_eq!(rebuilt.len(), 2);
        let flipped: Vec<&HireRecord> =
            rebuilt.iter().filter(|r| r.tutor_id == tutor).collect();
        assert_eq!(flipped.len(), 1);
        assert_eq!(flipped[0].status, HireStatus::Pending);
        assert_eq!(flipped[0].subject, "physics");
        assert_eq!(flipped[0].academic_level_id, level);
        // record id is reused, not regenerated
        assert_eq!(flipped[0].id, records[1].id);
        assert_eq!(
            rebuilt
                .iter()
                .filter(|r| r.tutor_id == other_tutor)
                .count(),
            1
        );
    }

    #[test]
    fn authorization_requires_an_accepted_record() {
        let tutor = ObjectId::new();
        let mut profile = StudentProfile {
            id: Some(ObjectId::new()),
            user_id: ObjectId::new(),
            academic_level: None,
            preferred_subjects: vec![],
            hired_tutors: vec![record(tutor, HireStatus::Pending)],
            availability: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(!is_authorized(&profile, &tutor));
        profile.hired_tutors[0].status = HireStatus::Accepted;
        assert!(is_authorized(&profile, &tutor));
        assert!(!is_authorized(&profile, &ObjectId::new()));
    }
}
