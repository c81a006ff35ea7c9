use axum::http::{Method, StatusCode};
use serde_json::json;
use time::Duration;
use tower::ServiceExt;

use crate::db::types::{GradeStatus, GradingMethod, SubmissionType};
use crate::repositories;
use crate::services::events::CompletionReason;
use crate::services::sessions::{self, Completion};
use crate::tasks;
use crate::test_support::{self, QuestionSpec, TestContext};

fn mixed_exam() -> Vec<QuestionSpec> {
    vec![
        QuestionSpec::mcq_single(
            "Capital of France?",
            vec![("A", "opt1"), ("B", "opt2")],
            "opt1",
            5,
        ),
        QuestionSpec::short_answer("What is Python?", "Python is a programming language", 10),
        QuestionSpec::mcq_multi(
            "Select primes",
            vec![("A", "opt1"), ("B", "opt2"), ("C", "opt3"), ("D", "opt4")],
            &["opt1", "opt2", "opt3"],
            10,
        ),
    ]
}

async fn start_session(ctx: &TestContext, auth: &str, exam_id: &str) -> (String, String) {
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{exam_id}/start"),
            Some(auth),
            None,
        ))
        .await
        .expect("start exam");
    let body = test_support::read_json(response).await;
    (
        body["data"]["session_id"].as_str().expect("session id").to_string(),
        body["data"]["token"].as_str().expect("token").to_string(),
    )
}

#[tokio::test]
async fn full_session_flow_grades_mcq_and_lexical_answers() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let student = test_support::insert_student(ctx.state.db(), "flow@test.io", "pass-word-1").await;
    let (exam, _questions) =
        test_support::insert_exam_with_questions(ctx.state.db(), "Final", 60, mixed_exam()).await;
    let auth = test_support::bearer_token(&student.id, ctx.state.settings());
    let (session_id, token) = start_session(&ctx, &auth, &exam.id).await;

    // answer the single-select MCQ
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/sessions/{token}/questions/1/answer"),
            Some(&auth),
            Some(json!({"answer_text": "opt1"})),
        ))
        .await
        .expect("answer q1");
    let body = test_support::read_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["progress"]["answered_count"], 1);

    // saved answer round-trips through the question fetch
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/sessions/{token}/questions/1"),
            Some(&auth),
            None,
        ))
        .await
        .expect("fetch q1");
    let body = test_support::read_json(response).await;
    assert_eq!(body["data"]["saved_answer"], "opt1");

    // free-text answer, stored verbatim
    ctx.app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/sessions/{token}/questions/2/answer"),
            Some(&auth),
            Some(json!({"answer_text": "Python is a programming language"})),
        ))
        .await
        .expect("answer q2");

    // multi-select: two of three correct picks
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/sessions/{token}/questions/3/answer"),
            Some(&auth),
            Some(json!({"answer_text": "[\"opt1\",\"opt2\"]"})),
        ))
        .await
        .expect("answer q3");
    let body = test_support::read_json(response).await;
    assert_eq!(body["data"]["answer_text"], "[\"opt1\",\"opt2\"]");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/sessions/{token}/progress"),
            Some(&auth),
            None,
        ))
        .await
        .expect("progress");
    let body = test_support::read_json(response).await;
    assert_eq!(body["data"]["total_questions"], 3);
    assert_eq!(body["data"]["answered_count"], 3);
    assert_eq!(body["data"]["answered_questions"], json!([1, 2, 3]));
    assert_eq!(body["data"]["is_expired"], false);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/sessions/{token}/submit"),
            Some(&auth),
            None,
        ))
        .await
        .expect("submit session");
    let body = test_support::read_json(response).await;
    assert_eq!(body["data"]["status"], "submitted");

    let grade = test_support::wait_for_grade(ctx.state.db(), &session_id).await;
    assert_eq!(grade.status, GradeStatus::Completed);
    assert_eq!(grade.grading_method, GradingMethod::Manual);
    assert_eq!(grade.max_score, 25.0);
    // 5 (correct MCQ) + 10 (identical lexical answer) + 6.67 (2/3 multi)
    assert_eq!(grade.total_score, 21.67);
    assert_eq!(grade.percentage, 86.68);
    assert_eq!(grade.answers_data.0.len(), 3);
    assert_eq!(grade.answers_data.0[2].score, 6.67);

    // session row reflects the manual submission
    let session =
        repositories::sessions::find_by_id(ctx.state.db(), &session_id).await.unwrap().unwrap();
    assert!(session.is_completed);
    assert_eq!(session.submission_type, Some(SubmissionType::Manual));
}

#[tokio::test]
async fn invalid_answer_shapes_are_rejected() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let student = test_support::insert_student(ctx.state.db(), "shapes@test.io", "pass-word-1").await;
    let (exam, _questions) =
        test_support::insert_exam_with_questions(ctx.state.db(), "Shapes", 60, mixed_exam()).await;
    let auth = test_support::bearer_token(&student.id, ctx.state.settings());
    let (_session_id, token) = start_session(&ctx, &auth, &exam.id).await;

    for (order, answer) in [
        (1, json!({"answer_text": ""})),
        (1, json!({"answer_text": "not-an-option"})),
        (1, json!({"answer_text": "[\"opt1\",\"opt2\"]"})),
        (3, json!({"answer_text": "[]"})),
        (3, json!({"answer_text": "[\"opt1\",\"bogus\"]"})),
    ] {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/v1/sessions/{token}/questions/{order}/answer"),
                Some(&auth),
                Some(answer.clone()),
            ))
            .await
            .expect("submit invalid answer");
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "answer {answer} for question {order} should be rejected"
        );
    }

    // out-of-range question order
    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/sessions/{token}/questions/9"),
            Some(&auth),
            None,
        ))
        .await
        .expect("fetch missing question");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tokens_reject_foreign_students_uniformly() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let owner = test_support::insert_student(ctx.state.db(), "owner@test.io", "pass-word-1").await;
    let intruder =
        test_support::insert_student(ctx.state.db(), "intruder@test.io", "pass-word-1").await;
    let (exam, _questions) =
        test_support::insert_exam_with_questions(ctx.state.db(), "Private", 60, mixed_exam()).await;
    let owner_auth = test_support::bearer_token(&owner.id, ctx.state.settings());
    let intruder_auth = test_support::bearer_token(&intruder.id, ctx.state.settings());
    let (_session_id, token) = start_session(&ctx, &owner_auth, &exam.id).await;

    for uri in [
        format!("/api/v1/sessions/{token}/progress"),
        format!("/api/v1/sessions/{token}/questions/1"),
        format!("/api/v1/sessions/bogus-token/progress"),
    ] {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(Method::GET, &uri, Some(&intruder_auth), None))
            .await
            .expect("token misuse");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "response: {body}");
        // one uniform message, no oracle for which check failed
        assert_eq!(body["message"], "Invalid or expired session token.");
    }
}

#[tokio::test]
async fn completion_is_idempotent_across_manual_and_timer_races() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let student = test_support::insert_student(ctx.state.db(), "race@test.io", "pass-word-1").await;
    let (exam, _questions) =
        test_support::insert_exam_with_questions(ctx.state.db(), "Race", 60, mixed_exam()).await;
    let auth = test_support::bearer_token(&student.id, ctx.state.settings());
    let (session_id, token) = start_session(&ctx, &auth, &exam.id).await;

    let first = sessions::complete_and_grade(
        &ctx.state,
        &session_id,
        CompletionReason::Submitted,
        vec![token.clone()],
        SubmissionType::Manual,
    )
    .await
    .expect("first completion");
    assert!(matches!(first, Completion::Transitioned));

    let grade = test_support::wait_for_grade(ctx.state.db(), &session_id).await;

    // the timer's attempt loses and observes the existing record
    let second = sessions::complete_and_grade(
        &ctx.state,
        &session_id,
        CompletionReason::Timeout,
        Vec::new(),
        SubmissionType::AutoExpired,
    )
    .await
    .expect("second completion");
    match second {
        Completion::AlreadyCompleted(Some(existing)) => assert_eq!(existing.id, grade.id),
        _ => panic!("expected the existing grade record"),
    }

    // submit-once: still exactly one grade row, manual won
    let stored =
        repositories::grades::find_by_session(ctx.state.db(), &session_id).await.unwrap().unwrap();
    assert_eq!(stored.id, grade.id);
    assert_eq!(stored.grading_method, GradingMethod::Manual);

    let session =
        repositories::sessions::find_by_id(ctx.state.db(), &session_id).await.unwrap().unwrap();
    assert_eq!(session.submission_type, Some(SubmissionType::Manual));
}

#[tokio::test]
async fn expired_sessions_are_swept_and_graded_as_timeout() {
    let (clock, _start) = test_support::fixed_clock_now();
    let Some(ctx) = test_support::setup_test_context_with_clock(clock.clone()).await else {
        return;
    };

    let student = test_support::insert_student(ctx.state.db(), "sweep@test.io", "pass-word-1").await;
    let (exam, _questions) =
        test_support::insert_exam_with_questions(ctx.state.db(), "Timed", 60, mixed_exam()).await;
    let auth = test_support::bearer_token(&student.id, ctx.state.settings());
    let (session_id, token) = start_session(&ctx, &auth, &exam.id).await;

    // partial work before the deadline
    ctx.app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/sessions/{token}/questions/1/answer"),
            Some(&auth),
            Some(json!({"answer_text": "opt1"})),
        ))
        .await
        .expect("answer q1");

    // a client connected on the current token hears the timeout
    let mut events = ctx.state.events().subscribe(&token);

    clock.advance(Duration::minutes(61));

    // expired session rejects further operations with the uniform error
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/sessions/{token}/progress"),
            Some(&auth),
            None,
        ))
        .await
        .expect("progress after expiry");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let swept = tasks::expiry::sweep_expired(&ctx.state).await.expect("sweep");
    assert_eq!(swept, 1);

    let event = events.recv().await.expect("completion event");
    let payload = serde_json::to_value(&event).unwrap();
    assert_eq!(payload["type"], "session_completed");
    assert_eq!(payload["reason"], "timeout");

    let grade = test_support::wait_for_grade(ctx.state.db(), &session_id).await;
    assert_eq!(grade.status, GradeStatus::Completed);
    assert_eq!(grade.grading_method, GradingMethod::Timeout);
    // only the answered MCQ scored
    assert_eq!(grade.total_score, 5.0);

    let session =
        repositories::sessions::find_by_id(ctx.state.db(), &session_id).await.unwrap().unwrap();
    assert!(session.is_completed);
    assert_eq!(session.submission_type, Some(SubmissionType::AutoExpired));

    // sweeping again finds nothing: auto-submit is idempotent
    let swept = tasks::expiry::sweep_expired(&ctx.state).await.expect("second sweep");
    assert_eq!(swept, 0);
}

#[tokio::test]
async fn manual_submit_after_timer_expiry_reports_the_completed_session() {
    let (clock, _start) = test_support::fixed_clock_now();
    let Some(ctx) = test_support::setup_test_context_with_clock(clock.clone()).await else {
        return;
    };

    let student = test_support::insert_student(ctx.state.db(), "loser@test.io", "pass-word-1").await;
    let intruder =
        test_support::insert_student(ctx.state.db(), "meddler@test.io", "pass-word-1").await;
    let (exam, _questions) =
        test_support::insert_exam_with_questions(ctx.state.db(), "Photo finish", 60, mixed_exam())
            .await;
    let auth = test_support::bearer_token(&student.id, ctx.state.settings());
    let (session_id, token) = start_session(&ctx, &auth, &exam.id).await;

    ctx.app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/sessions/{token}/questions/1/answer"),
            Some(&auth),
            Some(json!({"answer_text": "opt1"})),
        ))
        .await
        .expect("answer q1");

    // the timer wins: the session expires and auto-submit completes it
    clock.advance(Duration::minutes(61));
    let swept = tasks::expiry::sweep_expired(&ctx.state).await.expect("sweep");
    assert_eq!(swept, 1);
    let grade = test_support::wait_for_grade(ctx.state.db(), &session_id).await;

    // the student's late submit observes the completed session, not an error
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/sessions/{token}/submit"),
            Some(&auth),
            None,
        ))
        .await
        .expect("late manual submit");
    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");
    assert_eq!(body["data"]["status"], "already_completed");
    assert_eq!(body["data"]["session_id"], session_id.as_str());
    assert_eq!(body["data"]["grade_history_id"], grade.id.as_str());

    // exactly one grade record, attributed to the timer
    let stored =
        repositories::grades::find_by_session(ctx.state.db(), &session_id).await.unwrap().unwrap();
    assert_eq!(stored.id, grade.id);
    assert_eq!(stored.grading_method, GradingMethod::Timeout);
    let session =
        repositories::sessions::find_by_id(ctx.state.db(), &session_id).await.unwrap().unwrap();
    assert_eq!(session.submission_type, Some(SubmissionType::AutoExpired));

    // a different student presenting the same token still gets the uniform error
    let intruder_auth = test_support::bearer_token(&intruder.id, ctx.state.settings());
    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/sessions/{token}/submit"),
            Some(&intruder_auth),
            None,
        ))
        .await
        .expect("foreign late submit");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn auto_submit_reschedules_until_the_deadline() {
    let (clock, _start) = test_support::fixed_clock_now();
    let Some(ctx) = test_support::setup_test_context_with_clock(clock.clone()).await else {
        return;
    };

    let student = test_support::insert_student(ctx.state.db(), "early@test.io", "pass-word-1").await;
    let (exam, _questions) =
        test_support::insert_exam_with_questions(ctx.state.db(), "Early", 60, mixed_exam()).await;
    let auth = test_support::bearer_token(&student.id, ctx.state.settings());
    let (session_id, _token) = start_session(&ctx, &auth, &exam.id).await;

    // woken early: asks to be re-armed for the stored deadline
    let next = tasks::expiry::auto_submit(&ctx.state, &session_id).await.expect("auto submit");
    let session =
        repositories::sessions::find_by_id(ctx.state.db(), &session_id).await.unwrap().unwrap();
    assert_eq!(next, Some(session.expires_at));
    assert!(!session.is_completed);

    // unknown session: nothing to do
    let next = tasks::expiry::auto_submit(&ctx.state, "missing-session").await.expect("missing");
    assert_eq!(next, None);
}

#[tokio::test]
async fn token_rotation_notifies_old_connections() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let student = test_support::insert_student(ctx.state.db(), "rotate@test.io", "pass-word-1").await;
    let (exam, _questions) =
        test_support::insert_exam_with_questions(ctx.state.db(), "Rotate", 60, mixed_exam()).await;
    let auth = test_support::bearer_token(&student.id, ctx.state.settings());
    let (_session_id, first_token) = start_session(&ctx, &auth, &exam.id).await;

    let mut events = ctx.state.events().subscribe(&first_token);

    let (_session_id, second_token) = start_session(&ctx, &auth, &exam.id).await;
    assert_ne!(first_token, second_token);

    let event = events.recv().await.expect("expiry event");
    let payload = serde_json::to_value(&event).unwrap();
    assert_eq!(payload["type"], "session_expired");
    assert_eq!(payload["reason"], "token_expired");
}
