//! Cross-module checks of the booking rules: conflict detection, earnings,
//! payment validity, hire authorization and the completion bookkeeping.

use chrono::{Duration, TimeZone, Utc};
use mongodb::bson::oid::ObjectId;

use tutorlink_api::models::payment::{PaymentStatus, PaymentType, StudentPayment, ValidityStatus};
use tutorlink_api::models::session::{ResponseStatus, SessionStatus, StudentResponse};
use tutorlink_api::models::student::{HireRecord, HireStatus, StudentProfile};
use tutorlink_api::models::TutoringSession;
use tutorlink_api::services::hire_service::is_authorized;
use tutorlink_api::services::payment_service::compute_package_amount;
use tutorlink_api::services::session_service::{
    calendar_month_bounds, earnings, intervals_overlap, tutoring_hours_delta,
};
use tutorlink_api::utils::time::parse_session_date;

fn sample_session(student_id: ObjectId) -> TutoringSession {
    let date = parse_session_date("2025-08-15T09:00:00").unwrap();
    TutoringSession {
        id: Some(ObjectId::new()),
        tutor_id: ObjectId::new(),
        student_ids: vec![student_id],
        subject: "maths".to_string(),
        academic_level: ObjectId::new(),
        session_date: date,
        duration_hours: 1.0,
        hourly_rate: 20.0,
        total_earnings: earnings(1.0, 20.0),
        status: SessionStatus::Pending,
        notes: None,
        rating: None,
        feedback: None,
        student_responses: vec![],
        student_ratings: vec![],
        student_proposed_date: None,
        student_proposed_status: None,
        student_proposed_decided_at: None,
        completed_at: None,
        created_at: date,
        updated_at: date,
    }
}

#[test]
fn double_booking_is_detected() {
    // 10:00-11:00 against 10:30-11:30
    let first = Utc.with_ymd_and_hms(2025, 8, 15, 10, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2025, 8, 15, 10, 30, 0).unwrap();
    assert!(intervals_overlap(first, 1.0, second, 1.0));

    // an adjacent slot is fine
    let adjacent = Utc.with_ymd_and_hms(2025, 8, 15, 11, 0, 0).unwrap();
    assert!(!intervals_overlap(first, 1.0, adjacent, 1.0));
}

#[test]
fn authorization_gate_is_independent_of_payment() {
    let tutor_id = ObjectId::new();
    let now = Utc::now();
    let profile = StudentProfile {
        id: Some(ObjectId::new()),
        user_id: ObjectId::new(),
        academic_level: None,
        preferred_subjects: vec!["maths".to_string()],
        hired_tutors: vec![HireRecord {
            id: ObjectId::new(),
            tutor_id,
            subject: "maths".to_string(),
            academic_level_id: ObjectId::new(),
            status: HireStatus::Pending,
            hired_at: now,
        }],
        availability: vec![],
        created_at: now,
        updated_at: now,
    };

    // pending hire never authorizes, whatever the ledger says
    assert!(!is_authorized(&profile, &tutor_id));
}

#[test]
fn exhausted_payment_window_reads_invalid() {
    let now = Utc::now();
    let payment = StudentPayment {
        id: Some(ObjectId::new()),
        student_id: ObjectId::new(),
        tutor_id: ObjectId::new(),
        subject: "maths".to_string(),
        academic_level_id: ObjectId::new(),
        payment_type: PaymentType::Monthly,
        base_amount: 20.0,
        monthly_amount: compute_package_amount(PaymentType::Monthly, 20.0, 5, 10.0),
        discount_percentage: 10.0,
        total_sessions_per_month: 5,
        validity_start_date: Some(now - Duration::days(5)),
        validity_end_date: Some(now + Duration::days(25)),
        sessions_remaining: 0,
        payment_status: PaymentStatus::Paid,
        validity_status: ValidityStatus::Active,
        academic_level_paid: true,
        is_active: true,
        gateway_session_id: None,
        payment_date: Some(now - Duration::days(5)),
        created_at: now - Duration::days(5),
        updated_at: now,
    };

    assert!(!payment.is_valid(now));
    assert!(payment.needs_expiry(now));
}

#[test]
fn end_to_end_booking_scenario() {
    // tutor books 2025-08-15 09:00, 1h at 20 GBP
    let student_id = ObjectId::new();
    let mut session = sample_session(student_id);
    assert_eq!(session.status, SessionStatus::Pending);
    assert!((session.total_earnings - 20.0).abs() < f64::EPSILON);

    // student confirms
    session.student_responses.push(StudentResponse {
        student_id,
        status: ResponseStatus::Confirmed,
        responded_at: Utc::now(),
    });
    session.status = SessionStatus::Confirmed;
    assert_eq!(session.effective_status_for(&student_id), SessionStatus::Confirmed);

    // completion moves the tutor's lifetime hours by the session duration
    let delta = tutoring_hours_delta(
        session.status,
        SessionStatus::Completed,
        session.duration_hours,
        session.duration_hours,
    );
    assert!((delta - 1.0).abs() < f64::EPSILON);
}

#[test]
fn earnings_follow_every_duration_or_rate_change() {
    let cases = [(1.0, 20.0, 20.0), (1.5, 22.0, 33.0), (0.25, 100.0, 25.0)];
    for (duration, rate, expected) in cases {
        assert!((earnings(duration, rate) - expected).abs() < f64::EPSILON);
    }
}

#[test]
fn naive_session_dates_are_utc_instants() {
    let parsed = parse_session_date("2025-08-15T09:00:00").unwrap();
    assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap());
}

#[test]
fn quota_month_bounds_contain_only_the_current_month() {
    let now = Utc.with_ymd_and_hms(2025, 8, 15, 12, 0, 0).unwrap();
    let (start, end) = calendar_month_bounds(now);
    assert!(start <= now && now < end);
    assert_eq!(start, Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap());
    assert_eq!(end, Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap());
}
