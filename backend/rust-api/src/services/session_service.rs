use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use mongodb::Database;
use redis::aio::ConnectionManager;

use crate::config::{BookingPolicy, QuotaWindow};
use crate::error::ApiError;
use crate::metrics::{
    record_cache_hit, record_cache_miss, track_cache_operation, track_db_operation,
    BOOKING_REJECTIONS_TOTAL, SESSIONS_TOTAL,
};
use crate::models::session::{
    CreateSessionRequest, ProposalDecision, ProposalStatus, RateSessionRequest, ResponseStatus,
    StudentRating, StudentResponse, UpdateSessionRequest,
};
use crate::models::{SessionStatus, StudentPayment, StudentProfile, TutorProfile, TutoringSession};
use crate::services::hire_service;
use crate::services::payment_service::PaymentService;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::{chrono_to_bson, parse_session_date};

const TUTORING_SESSIONS: &str = "tutoring_sessions";
const TUTOR_PROFILES: &str = "tutor_profiles";
const STUDENT_PROFILES: &str = "student_profiles";

/// Idempotency replay window for retried create calls
const IDEMPOTENCY_TTL_SECONDS: u64 = 86_400;

/// Session scheduler and lifecycle engine.
///
/// Creation runs the full gate sequence: teaching-terms lookup, monthly
/// quota, hire authorization per student, the optional payment gate, and
/// interval-overlap conflict detection, in that order. Lifecycle methods
/// cover per-student responses, reschedule proposals and rating.
pub struct SessionService {
    mongo: Database,
    redis: ConnectionManager,
    policy: BookingPolicy,
}

impl SessionService {
    pub fn new(mongo: Database, redis: ConnectionManager, policy: BookingPolicy) -> Self {
        Self {
            mongo,
            redis,
            policy,
        }
    }

    pub async fn create_session(
        &self,
        tutor_user_id: &ObjectId,
        req: &CreateSessionRequest,
        idempotency_key: Option<&str>,
    ) -> Result<TutoringSession, ApiError> {
        // Replay a retried create instead of double-booking
        if let Some(key) = idempotency_key {
            if let Some(cached) = self.idempotency_lookup(tutor_user_id, key).await? {
                record_cache_hit();
                tracing::info!("Replaying idempotent session create: key={}", key);
                return Ok(cached);
            }
            record_cache_miss();
        }

        let session_date = parse_session_date(&req.session_date)?;
        let academic_level = parse_object_id(&req.academic_level, "academic_level")?;
        if req.student_ids.is_empty() {
            return Err(ApiError::Validation(
                "At least one student is required".to_string(),
            ));
        }

        let retry_cfg = RetryConfig::default();
        let tutor = retry_async_with_config(retry_cfg, || async {
            self.find_tutor_by_user(tutor_user_id).await
        })
        .await?;
        let tutor_id = tutor.id.ok_or(ApiError::NotFound("tutor profile"))?;
        let level = tutor.level_taught(&academic_level).ok_or_else(|| {
            ApiError::Validation("Tutor does not teach this academic level".to_string())
        })?;

        // Monthly cap, counted per the configured quota window
        let cap = level.total_sessions_per_month as u64;
        let booked = self
            .count_quota_sessions(&tutor_id, &academic_level, Utc::now())
            .await?;
        if booked >= cap {
            BOOKING_REJECTIONS_TOTAL.with_label_values(&["quota"]).inc();
            return Err(ApiError::QuotaExceeded(format!(
                "Monthly session limit of {} reached for this academic level",
                cap
            )));
        }

        // Every listed student must have accepted a hire request
        let mut student_ids = Vec::with_capacity(req.student_ids.len());
        let mut payments: Vec<StudentPayment> = Vec::new();
        let payment_service = PaymentService::new(self.mongo.clone());
        for raw_id in &req.student_ids {
            let student_profile_id = parse_object_id(raw_id, "student_id")?;
            let profile = self
                .mongo
                .collection::<StudentProfile>(STUDENT_PROFILES)
                .find_one(doc! { "_id": student_profile_id })
                .await?
                .ok_or(ApiError::NotFound("student profile"))?;

            if !hire_service::is_authorized(&profile, &tutor_id) {
                BOOKING_REJECTIONS_TOTAL
                    .with_label_values(&["unauthorized"])
                    .inc();
                return Err(ApiError::Forbidden(
                    "This student has not accepted a hire request from you".to_string(),
                ));
            }

            if self.policy.require_payment_at_booking {
                let payment = payment_service
                    .find_valid_payment(
                        &student_profile_id,
                        &tutor_id,
                        &req.subject,
                        &academic_level,
                    )
                    .await?
                    .ok_or_else(|| {
                        BOOKING_REJECTIONS_TOTAL
                            .with_label_values(&["payment"])
                            .inc();
                        ApiError::Forbidden(
                            "No valid payment for this subject and academic level".to_string(),
                        )
                    })?;
                payments.push(payment);
            }

            student_ids.push(student_profile_id);
        }

        // Conflict detection over the tutor's active calendar
        let existing = self.active_sessions_for_tutor(&tutor_id, None).await?;
        if let Some(conflicting) = find_overlap(session_date, req.duration_hours, &existing) {
            BOOKING_REJECTIONS_TOTAL
                .with_label_values(&["conflict"])
                .inc();
            tracing::warn!(
                "Booking conflict: tutor={} new={} existing={}",
                tutor_id,
                session_date,
                conflicting.session_date
            );
            return Err(ApiError::Conflict(
                "You already have an active session in progress during this time".to_string(),
            ));
        }

        // All gates passed: consume quota from each payment window. The
        // conditional $inc is what prevents overselling under concurrency.
        for payment in &payments {
            let payment_id = payment.id.ok_or(ApiError::NotFound("payment"))?;
            if !payment_service.consume_session(&payment_id).await? {
                BOOKING_REJECTIONS_TOTAL
                    .with_label_values(&["payment"])
                    .inc();
                return Err(ApiError::QuotaExceeded(
                    "No sessions remaining on the payment for this academic level".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let mut session = TutoringSession {
            id: None,
            tutor_id,
            student_ids,
            subject: req.subject.clone(),
            academic_level,
            session_date,
            duration_hours: req.duration_hours,
            hourly_rate: req.hourly_rate,
            total_earnings: earnings(req.duration_hours, req.hourly_rate),
            status: SessionStatus::Pending,
            notes: req.notes.clone(),
            rating: None,
            feedback: None,
            student_responses: vec![],
            student_ratings: vec![],
            student_proposed_date: None,
            student_proposed_status: None,
            student_proposed_decided_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let collection = self.mongo.collection::<TutoringSession>(TUTORING_SESSIONS);
        let insert_result = track_db_operation("insert", TUTORING_SESSIONS, async {
            collection
                .insert_one(&session)
                .await
                .context("Failed to insert session")
        })
        .await?;
        session.id = insert_result.inserted_id.as_object_id();

        SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        tracing::info!(
            "Session created: tutor={} date={} duration={}h earnings={}",
            tutor_id,
            session_date,
            req.duration_hours,
            session.total_earnings
        );

        if let Some(key) = idempotency_key {
            self.idempotency_store(tutor_user_id, key, &session).await;
        }

        Ok(session)
    }

    /// Patch a session. The wire contract always carries date, duration and
    /// rate; earnings are recomputed and the overlap invariant is re-checked
    /// against the tutor's other active sessions.
    pub async fn update_session(
        &self,
        tutor_user_id: &ObjectId,
        session_id: &ObjectId,
        req: &UpdateSessionRequest,
    ) -> Result<TutoringSession, ApiError> {
        let tutor = self.find_tutor_by_user(tutor_user_id).await?;
        let tutor_id = tutor.id.ok_or(ApiError::NotFound("tutor profile"))?;

        let collection = self.mongo.collection::<TutoringSession>(TUTORING_SESSIONS);
        let session = collection
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))?;

        if session.tutor_id != tutor_id {
            return Err(ApiError::Forbidden(
                "You can only update your own sessions".to_string(),
            ));
        }

        let new_date = parse_session_date(&req.session_date)?;
        let new_status = req.status.unwrap_or(session.status);

        if new_status.is_active() {
            let others = self
                .active_sessions_for_tutor(&tutor_id, Some(session_id))
                .await?;
            if find_overlap(new_date, req.duration_hours, &others).is_some() {
                BOOKING_REJECTIONS_TOTAL
                    .with_label_values(&["conflict"])
                    .inc();
                return Err(ApiError::Conflict(
                    "You already have an active session in progress during this time".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let mut set = doc! {
            "session_date": chrono_to_bson(new_date),
            "duration_hours": req.duration_hours,
            "hourly_rate": req.hourly_rate,
            "total_earnings": earnings(req.duration_hours, req.hourly_rate),
            "status": new_status.as_str(),
            "updatedAt": chrono_to_bson(now),
        };
        if let Some(notes) = &req.notes {
            set.insert("notes", notes);
        }
        if let Some(rating) = req.rating {
            set.insert("rating", rating);
        }
        if let Some(feedback) = &req.feedback {
            set.insert("feedback", feedback);
        }

        let completing = new_status == SessionStatus::Completed
            && session.status != SessionStatus::Completed;
        if completing {
            set.insert("completed_at", chrono_to_bson(now));
        }

        collection
            .update_one(doc! { "_id": session_id }, doc! { "$set": set })
            .await?;

        // Keep the tutor's lifetime hours in step with completed work
        let hours_delta = tutoring_hours_delta(
            session.status,
            new_status,
            session.duration_hours,
            req.duration_hours,
        );
        if hours_delta != 0.0 {
            self.mongo
                .collection::<TutorProfile>(TUTOR_PROFILES)
                .update_one(
                    doc! { "_id": tutor_id },
                    doc! {
                        "$inc": { "total_tutoring_hours": hours_delta },
                        "$set": { "updatedAt": chrono_to_bson(now) },
                    },
                )
                .await?;
        }

        if completing {
            SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
        } else if new_status == SessionStatus::Cancelled
            && session.status != SessionStatus::Cancelled
        {
            SESSIONS_TOTAL.with_label_values(&["cancelled"]).inc();
        }

        collection
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))
    }

    pub async fn delete_session(
        &self,
        tutor_user_id: &ObjectId,
        session_id: &ObjectId,
    ) -> Result<(), ApiError> {
        let tutor = self.find_tutor_by_user(tutor_user_id).await?;
        let tutor_id = tutor.id.ok_or(ApiError::NotFound("tutor profile"))?;

        let collection = self.mongo.collection::<TutoringSession>(TUTORING_SESSIONS);
        let session = collection
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))?;

        if session.tutor_id != tutor_id {
            return Err(ApiError::Forbidden(
                "You can only delete your own sessions".to_string(),
            ));
        }
        if matches!(
            session.status,
            SessionStatus::Completed | SessionStatus::InProgress
        ) {
            return Err(ApiError::Validation(
                "Cannot delete a session that is completed or in progress".to_string(),
            ));
        }

        collection.delete_one(doc! { "_id": session_id }).await?;
        SESSIONS_TOTAL.with_label_values(&["deleted"]).inc();
        tracing::info!("Session deleted: {} by tutor {}", session_id, tutor_id);
        Ok(())
    }

    /// Per-student confirm/decline. A decline never mutates the shared
    /// status; once every listed student has confirmed a pending session it
    /// moves to confirmed.
    pub async fn respond_to_session(
        &self,
        student_user_id: &ObjectId,
        session_id: &ObjectId,
        action: ResponseStatus,
    ) -> Result<TutoringSession, ApiError> {
        let (student_id, session) = self.session_for_student(student_user_id, session_id).await?;
        if session.status.is_terminal() {
            return Err(ApiError::Validation(
                "This session is no longer open for responses".to_string(),
            ));
        }

        let now = Utc::now();
        let responses = upsert_response(&session.student_responses, student_id, action, now);

        let mut set = doc! {
            "student_responses": to_bson(&responses).map_err(anyhow::Error::from)?,
            "updatedAt": chrono_to_bson(now),
        };
        if session.status == SessionStatus::Pending
            && all_students_confirmed(&session.student_ids, &responses)
        {
            set.insert("status", SessionStatus::Confirmed.as_str());
        }

        let collection = self.mongo.collection::<TutoringSession>(TUTORING_SESSIONS);
        collection
            .update_one(doc! { "_id": session_id }, doc! { "$set": set })
            .await?;

        collection
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))
    }

    /// Student proposes a new time; the session drops back to pending until
    /// the tutor decides.
    pub async fn propose_reschedule(
        &self,
        student_user_id: &ObjectId,
        session_id: &ObjectId,
        proposed_date: &str,
    ) -> Result<TutoringSession, ApiError> {
        let (_, session) = self.session_for_student(student_user_id, session_id).await?;
        if session.status.is_terminal() {
            return Err(ApiError::Validation(
                "Completed or cancelled sessions cannot be rescheduled".to_string(),
            ));
        }

        let proposed = parse_session_date(proposed_date)?;
        let now = Utc::now();

        let collection = self.mongo.collection::<TutoringSession>(TUTORING_SESSIONS);
        collection
            .update_one(
                doc! { "_id": session_id },
                doc! {
                    "$set": {
                        "student_proposed_date": chrono_to_bson(proposed),
                        "student_proposed_status": "pending",
                        "status": SessionStatus::Pending.as_str(),
                        "updatedAt": chrono_to_bson(now),
                    },
                    "$unset": { "student_proposed_decided_at": "" },
                },
            )
            .await?;

        collection
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))
    }

    pub async fn decide_reschedule(
        &self,
        tutor_user_id: &ObjectId,
        session_id: &ObjectId,
        decision: ProposalDecision,
    ) -> Result<TutoringSession, ApiError> {
        let tutor = self.find_tutor_by_user(tutor_user_id).await?;
        let tutor_id = tutor.id.ok_or(ApiError::NotFound("tutor profile"))?;

        let collection = self.mongo.collection::<TutoringSession>(TUTORING_SESSIONS);
        let session = collection
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))?;

        if session.tutor_id != tutor_id {
            return Err(ApiError::Forbidden(
                "You can only decide proposals on your own sessions".to_string(),
            ));
        }
        if session.student_proposed_status != Some(ProposalStatus::Pending) {
            return Err(ApiError::Validation(
                "No pending reschedule proposal on this session".to_string(),
            ));
        }

        let now = Utc::now();
        let mut set = doc! {
            "student_proposed_decided_at": chrono_to_bson(now),
            "updatedAt": chrono_to_bson(now),
        };

        match decision {
            ProposalDecision::Accept => {
                let proposed = session
                    .student_proposed_date
                    .ok_or(ApiError::NotFound("reschedule proposal"))?;

                // Moving the session must not break the no-overlap invariant
                let others = self
                    .active_sessions_for_tutor(&tutor_id, Some(session_id))
                    .await?;
                if find_overlap(proposed, session.duration_hours, &others).is_some() {
                    BOOKING_REJECTIONS_TOTAL
                        .with_label_values(&["conflict"])
                        .inc();
                    return Err(ApiError::Conflict(
                        "You already have an active session in progress during this time"
                            .to_string(),
                    ));
                }

                set.insert("session_date", chrono_to_bson(proposed));
                set.insert("student_proposed_status", "accepted");
            }
            ProposalDecision::Reject => {
                set.insert("student_proposed_status", "rejected");
            }
        }

        collection
            .update_one(doc! { "_id": session_id }, doc! { "$set": set })
            .await?;

        collection
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))
    }

    /// Rating is allowed during an ongoing session as well as after
    /// completion.
    pub async fn rate_session(
        &self,
        student_user_id: &ObjectId,
        session_id: &ObjectId,
        req: &RateSessionRequest,
    ) -> Result<TutoringSession, ApiError> {
        let (student_id, session) = self.session_for_student(student_user_id, session_id).await?;
        if !matches!(
            session.status,
            SessionStatus::InProgress | SessionStatus::Completed
        ) {
            return Err(ApiError::Validation(
                "Sessions can only be rated while in progress or after completion".to_string(),
            ));
        }

        let now = Utc::now();
        let ratings = upsert_rating(
            &session.student_ratings,
            student_id,
            req.rating,
            req.feedback.clone(),
            now,
        );
        let aggregate = aggregate_rating(&ratings);

        let mut set = doc! {
            "student_ratings": to_bson(&ratings).map_err(anyhow::Error::from)?,
            "rating": aggregate,
            "updatedAt": chrono_to_bson(now),
        };
        if let Some(feedback) = &req.feedback {
            set.insert("feedback", feedback);
        }

        let collection = self.mongo.collection::<TutoringSession>(TUTORING_SESSIONS);
        collection
            .update_one(doc! { "_id": session_id }, doc! { "$set": set })
            .await?;

        collection
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))
    }

    pub async fn list_sessions_for_tutor(
        &self,
        tutor_user_id: &ObjectId,
    ) -> Result<Vec<TutoringSession>, ApiError> {
        let tutor = self.find_tutor_by_user(tutor_user_id).await?;
        let tutor_id = tutor.id.ok_or(ApiError::NotFound("tutor profile"))?;

        let mut cursor = self
            .mongo
            .collection::<TutoringSession>(TUTORING_SESSIONS)
            .find(doc! { "tutor_id": tutor_id })
            .sort(doc! { "session_date": -1 })
            .await?;

        let mut sessions = Vec::new();
        while let Some(session) = cursor.try_next().await? {
            sessions.push(session);
        }
        Ok(sessions)
    }

    pub async fn list_sessions_for_student(
        &self,
        student_user_id: &ObjectId,
    ) -> Result<(StudentProfile, Vec<TutoringSession>), ApiError> {
        let profile = self.find_student_by_user(student_user_id).await?;
        let student_id = profile.id.ok_or(ApiError::NotFound("student profile"))?;

        let mut cursor = self
            .mongo
            .collection::<TutoringSession>(TUTORING_SESSIONS)
            .find(doc! { "student_ids": student_id })
            .sort(doc! { "session_date": -1 })
            .await?;

        let mut sessions = Vec::new();
        while let Some(session) = cursor.try_next().await? {
            sessions.push(session);
        }
        Ok((profile, sessions))
    }

    async fn session_for_student(
        &self,
        student_user_id: &ObjectId,
        session_id: &ObjectId,
    ) -> Result<(ObjectId, TutoringSession), ApiError> {
        let profile = self.find_student_by_user(student_user_id).await?;
        let student_id = profile.id.ok_or(ApiError::NotFound("student profile"))?;

        let session = self
            .mongo
            .collection::<TutoringSession>(TUTORING_SESSIONS)
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or(ApiError::NotFound("session"))?;

        if !session.includes_student(&student_id) {
            return Err(ApiError::Forbidden(
                "You are not part of this session".to_string(),
            ));
        }
        Ok((student_id, session))
    }

    async fn count_quota_sessions(
        &self,
        tutor_id: &ObjectId,
        academic_level: &ObjectId,
        now: DateTime<Utc>,
    ) -> Result<u64, ApiError> {
        let filter = match self.policy.quota_window {
            // Legacy behavior: every session the tutor has ever created
            // counts against the cap, regardless of month or level.
            QuotaWindow::AllTime => doc! { "tutor_id": tutor_id },
            QuotaWindow::CalendarMonth => {
                let (start, end) = calendar_month_bounds(now);
                doc! {
                    "tutor_id": tutor_id,
                    "academic_level": academic_level,
                    "session_date": {
                        "$gte": chrono_to_bson(start),
                        "$lt": chrono_to_bson(end),
                    },
                }
            }
        };

        let collection = self.mongo.collection::<TutoringSession>(TUTORING_SESSIONS);
        let count = track_db_operation("count", TUTORING_SESSIONS, async {
            collection
                .count_documents(filter)
                .await
                .context("Failed to count sessions for quota")
        })
        .await?;
        Ok(count)
    }

    async fn active_sessions_for_tutor(
        &self,
        tutor_id: &ObjectId,
        exclude: Option<&ObjectId>,
    ) -> Result<Vec<TutoringSession>, ApiError> {
        let mut filter = doc! {
            "tutor_id": tutor_id,
            "status": { "$in": ["pending", "confirmed", "in_progress"] },
        };
        if let Some(excluded_id) = exclude {
            filter.insert("_id", doc! { "$ne": excluded_id });
        }

        let mut cursor = self
            .mongo
            .collection::<TutoringSession>(TUTORING_SESSIONS)
            .find(filter)
            .await?;

        let mut sessions = Vec::new();
        while let Some(session) = cursor.try_next().await? {
            sessions.push(session);
        }
        Ok(sessions)
    }

    async fn find_tutor_by_user(&self, user_id: &ObjectId) -> Result<TutorProfile, ApiError> {
        self.mongo
            .collection::<TutorProfile>(TUTOR_PROFILES)
            .find_one(doc! { "user_id": user_id })
            .await?
            .ok_or(ApiError::NotFound("tutor profile"))
    }

    async fn find_student_by_user(&self, user_id: &ObjectId) -> Result<StudentProfile, ApiError> {
        self.mongo
            .collection::<StudentProfile>(STUDENT_PROFILES)
            .find_one(doc! { "user_id": user_id })
            .await?
            .ok_or(ApiError::NotFound("student profile"))
    }

    async fn idempotency_lookup(
        &self,
        tutor_user_id: &ObjectId,
        key: &str,
    ) -> Result<Option<TutoringSession>, ApiError> {
        let mut conn = self.redis.clone();
        let cache_key = idempotency_cache_key(tutor_user_id, key);

        let cached: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&cache_key)
                .query_async(&mut conn)
                .await
                .context("Failed to read idempotency cache")
        })
        .await?;

        match cached {
            Some(json) => {
                let session = serde_json::from_str(&json).map_err(anyhow::Error::from)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Best-effort: a failed cache write only costs replay protection.
    async fn idempotency_store(
        &self,
        tutor_user_id: &ObjectId,
        key: &str,
        session: &TutoringSession,
    ) {
        let Ok(json) = serde_json::to_string(session) else {
            tracing::warn!("Failed to serialize session for idempotency cache");
            return;
        };
        let mut conn = self.redis.clone();
        let cache_key = idempotency_cache_key(tutor_user_id, key);

        let result = track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&cache_key)
                .arg(IDEMPOTENCY_TTL_SECONDS)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to store idempotency entry")
        })
        .await;

        if let Err(e) = result {
            tracing::warn!("Idempotency cache write failed: {}", e);
        }
    }
}

fn idempotency_cache_key(tutor_user_id: &ObjectId, key: &str) -> String {
    format!("booking:idem:{}:{}", tutor_user_id.to_hex(), key)
}

pub fn earnings(duration_hours: f64, hourly_rate: f64) -> f64 {
    duration_hours * hourly_rate
}

fn session_end(start: DateTime<Utc>, duration_hours: f64) -> DateTime<Utc> {
    start + Duration::seconds((duration_hours * 3600.0).round() as i64)
}

/// Half-open interval intersection: `[a, a_end)` against `[b, b_end)`.
/// Back-to-back sessions do not conflict.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_duration_hours: f64,
    b_start: DateTime<Utc>,
    b_duration_hours: f64,
) -> bool {
    a_start < session_end(b_start, b_duration_hours)
        && b_start < session_end(a_start, a_duration_hours)
}

fn find_overlap(
    start: DateTime<Utc>,
    duration_hours: f64,
    sessions: &[TutoringSession],
) -> Option<&TutoringSession> {
    sessions.iter().find(|existing| {
        intervals_overlap(
            start,
            duration_hours,
            existing.session_date,
            existing.duration_hours,
        )
    })
}

/// How much the tutor's lifetime hours move when a session update lands.
/// Only completed sessions contribute hours.
pub fn tutoring_hours_delta(
    old_status: SessionStatus,
    new_status: SessionStatus,
    old_duration: f64,
    new_duration: f64,
) -> f64 {
    let was_completed = old_status == SessionStatus::Completed;
    let is_completed = new_status == SessionStatus::Completed;
    match (was_completed, is_completed) {
        (false, true) => new_duration,
        (true, false) => -old_duration,
        (true, true) => new_duration - old_duration,
        (false, false) => 0.0,
    }
}

fn upsert_response(
    responses: &[StudentResponse],
    student_id: ObjectId,
    status: ResponseStatus,
    now: DateTime<Utc>,
) -> Vec<StudentResponse> {
    let mut updated: Vec<StudentResponse> = responses
        .iter()
        .filter(|r| r.student_id != student_id)
        .cloned()
        .collect();
    updated.push(StudentResponse {
        student_id,
        status,
        responded_at: now,
    });
    updated
}

fn all_students_confirmed(student_ids: &[ObjectId], responses: &[StudentResponse]) -> bool {
    student_ids.iter().all(|student_id| {
        responses
            .iter()
            .any(|r| r.student_id == *student_id && r.status == ResponseStatus::Confirmed)
    })
}

fn upsert_rating(
    ratings: &[StudentRating],
    student_id: ObjectId,
    rating: u8,
    feedback: Option<String>,
    now: DateTime<Utc>,
) -> Vec<StudentRating> {
    let mut updated: Vec<StudentRating> = ratings
        .iter()
        .filter(|r| r.student_id != student_id)
        .cloned()
        .collect();
    updated.push(StudentRating {
        student_id,
        rating,
        feedback,
        rated_at: now,
    });
    updated
}

fn aggregate_rating(ratings: &[StudentRating]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    ratings.iter().map(|r| r.rating as f64).sum::<f64>() / ratings.len() as f64
}

/// `[start of this month, start of next month)` in UTC.
pub fn calendar_month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .unwrap();
    let end = if now.month() == 12 {
        Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0).unwrap()
    } else {
        Utc.with_ymd_and_hms(now.year(), now.month() + 1, 1, 0, 0, 0)
            .unwrap()
    };
    (start, end)
}

fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value)
        .map_err(|_| ApiError::Validation(format!("Invalid {}: must be an ObjectId", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 15, hour, minute, 0).unwrap()
    }

    fn session_at(start: DateTime<Utc>, duration_hours: f64, status: SessionStatus) -> TutoringSession {
        TutoringSession {
            id: Some(ObjectId::new()),
            tutor_id: ObjectId::new(),
            student_ids: vec![ObjectId::new()],
            subject: "maths".to_string(),
            academic_level: ObjectId::new(),
            session_date: start,
            duration_hours,
            hourly_rate: 20.0,
            total_earnings: earnings(duration_hours, 20.0),
            status,
            notes: None,
            rating: None,
            feedback: None,
            student_responses: vec![],
            student_ratings: vec![],
            student_proposed_date: None,
            student_proposed_status: None,
            student_proposed_decided_at: None,
            completed_at: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn overlapping_intervals_conflict() {
        // 10:00-11:00 vs 10:30-11:30
        assert!(intervals_overlap(at(10, 0), 1.0, at(10, 30), 1.0));
        // containment
        assert!(intervals_overlap(at(10, 0), 2.0, at(10, 30), 0.5));
        // identical
        assert!(intervals_overlap(at(10, 0), 1.0, at(10, 0), 1.0));
    }

    #[test]
    fn back_to_back_sessions_do_not_conflict() {
        assert!(!intervals_overlap(at(10, 0), 1.0, at(11, 0), 1.0));
        assert!(!intervals_overlap(at(11, 0), 1.0, at(10, 0), 1.0));
    }

    #[test]
    fn disjoint_intervals_do_not_conflict() {
        assert!(!intervals_overlap(at(9, 0), 1.0, at(14, 0), 2.0));
    }

    #[test]
    fn fractional_durations_are_respected() {
        // 10:00-10:45 vs 10:45-11:15
        assert!(!intervals_overlap(at(10, 0), 0.75, at(10, 45), 0.5));
        // 10:00-10:46 would clip the next slot
        assert!(intervals_overlap(at(10, 0), 0.77, at(10, 45), 0.5));
    }

    #[test]
    fn find_overlap_returns_the_clashing_session() {
        let sessions = vec![
            session_at(at(9, 0), 1.0, SessionStatus::Confirmed),
            session_at(at(12, 0), 1.0, SessionStatus::Pending),
        ];
        let hit = find_overlap(at(12, 30), 1.0, &sessions).unwrap();
        assert_eq!(hit.session_date, at(12, 0));
        assert!(find_overlap(at(10, 0), 1.0, &sessions).is_none());
    }

    #[test]
    fn earnings_are_the_exact_product() {
        assert!((earnings(1.0, 20.0) - 20.0).abs() < f64::EPSILON);
        assert!((earnings(1.5, 33.0) - 49.5).abs() < f64::EPSILON);
        assert!((earnings(0.25, 40.0) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn completing_a_session_adds_its_hours() {
        let delta = tutoring_hours_delta(
            SessionStatus::Confirmed,
            SessionStatus::Completed,
            1.5,
            1.5,
        );
        assert!((delta - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reopening_a_completed_session_subtracts_hours() {
        let delta = tutoring_hours_delta(
            SessionStatus::Completed,
            SessionStatus::InProgress,
            2.0,
            2.0,
        );
        assert!((delta + 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn editing_a_completed_session_moves_hours_by_the_difference() {
        let delta = tutoring_hours_delta(
            SessionStatus::Completed,
            SessionStatus::Completed,
            1.0,
            2.5,
        );
        assert!((delta - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn non_completed_updates_leave_hours_alone() {
        let delta = tutoring_hours_delta(
            SessionStatus::Pending,
            SessionStatus::Confirmed,
            1.0,
            3.0,
        );
        assert_eq!(delta, 0.0);
    }

    #[test]
    fn responding_twice_keeps_one_response_per_student() {
        let student = ObjectId::new();
        let first = upsert_response(&[], student, ResponseStatus::Declined, at(10, 0));
        assert_eq!(first.len(), 1);

        let second = upsert_response(&first, student, ResponseStatus::Confirmed, at(11, 0));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].status, ResponseStatus::Confirmed);
    }

    #[test]
    fn confirmation_requires_every_listed_student() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let responses = upsert_response(&[], a, ResponseStatus::Confirmed, at(10, 0));
        assert!(!all_students_confirmed(&[a, b], &responses));

        let responses = upsert_response(&responses, b, ResponseStatus::Confirmed, at(10, 5));
        assert!(all_students_confirmed(&[a, b], &responses));
    }

    #[test]
    fn declined_student_blocks_full_confirmation() {
        let a = ObjectId::new();
        let responses = upsert_response(&[], a, ResponseStatus::Declined, at(10, 0));
        assert!(!all_students_confirmed(&[a], &responses));
    }

    #[test]
    fn rating_aggregates_across_students() {
        let ratings = upsert_rating(&[], ObjectId::new(), 5, None, at(10, 0));
        let ratings = upsert_rating(&ratings, ObjectId::new(), 4, None, at(10, 1));
        assert!((aggregate_rating(&ratings) - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn re_rating_replaces_the_previous_score() {
        let student = ObjectId::new();
        let ratings = upsert_rating(&[], student, 2, None, at(10, 0));
        let ratings = upsert_rating(&ratings, student, 5, Some("better".to_string()), at(11, 0));
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].rating, 5);
        assert!((aggregate_rating(&ratings) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn month_bounds_cover_the_calendar_month() {
        let (start, end) = calendar_month_bounds(at(10, 0));
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn month_bounds_roll_over_december() {
        let december = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 0).unwrap();
        let (start, end) = calendar_month_bounds(december);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }
}
