use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::repositories;
use crate::test_support::{self, QuestionSpec};

fn question_payload(text: &str) -> serde_json::Value {
    json!({
        "question_text": text,
        "question_type": "short_answer",
        "expected_answer": "An answer",
        "points": 5
    })
}

#[tokio::test]
async fn admin_authors_questions_and_activates_exam() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let admin = test_support::insert_admin(ctx.state.db(), "author@test.io", "pass-word-1").await;
    let token = test_support::bearer_token(&admin.id, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/admin/exams",
            Some(&token),
            Some(json!({
                "title": "History midterm",
                "description": "Unit test exam",
                "course": "HIS-201",
                "duration_minutes": 45
            })),
        ))
        .await
        .expect("create exam");
    let status = response.status();
    let created = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "response: {created}");
    let exam_id = created["data"]["id"].as_str().expect("exam id").to_string();
    assert_eq!(created["data"]["is_active"], false);

    // no questions yet: activation is refused
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/admin/exams/{exam_id}/activate"),
            Some(&token),
            None,
        ))
        .await
        .expect("activate empty exam");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/admin/exams/{exam_id}/questions"),
            Some(&token),
            Some(json!({
                "question_text": "Pick the capital",
                "question_type": "multiple_choice",
                "expected_answer": "Paris",
                "options": [
                    {"label": "A", "value": "Paris"},
                    {"label": "B", "value": "London"}
                ],
                "points": 5
            })),
        ))
        .await
        .expect("add question");
    let status = response.status();
    let question = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "response: {question}");
    assert_eq!(question["data"]["order"], 1);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/admin/exams/{exam_id}/activate"),
            Some(&token),
            None,
        ))
        .await
        .expect("activate exam");
    let activated = test_support::read_json(response).await;
    assert_eq!(activated["data"]["is_active"], true);
}

#[tokio::test]
async fn mcq_validation_rejects_bad_payloads() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let admin = test_support::insert_admin(ctx.state.db(), "strict@test.io", "pass-word-1").await;
    let token = test_support::bearer_token(&admin.id, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/admin/exams",
            Some(&token),
            Some(json!({"title": "Strict", "course": "STR-1", "duration_minutes": 30})),
        ))
        .await
        .expect("create exam");
    let created = test_support::read_json(response).await;
    let exam_id = created["data"]["id"].as_str().expect("exam id").to_string();

    for payload in [
        // expected answer not among option values
        json!({
            "question_text": "Bad expected",
            "question_type": "multiple_choice",
            "expected_answer": "Rome",
            "options": [{"label": "A", "value": "Paris"}, {"label": "B", "value": "London"}],
            "points": 5
        }),
        // a single option is not enough
        json!({
            "question_text": "Too few options",
            "question_type": "multiple_choice",
            "expected_answer": "Paris",
            "options": [{"label": "A", "value": "Paris"}],
            "points": 5
        }),
        // allow_multiple outside multiple choice
        json!({
            "question_text": "Essay",
            "question_type": "essay",
            "expected_answer": "Because",
            "allow_multiple": true,
            "points": 5
        }),
        // zero points
        json!({
            "question_text": "Free",
            "question_type": "short_answer",
            "expected_answer": "Answer",
            "points": 0
        }),
    ] {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/v1/admin/exams/{exam_id}/questions"),
                Some(&token),
                Some(payload.clone()),
            ))
            .await
            .expect("add invalid question");
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "payload should be rejected: {payload}"
        );
    }
}

#[tokio::test]
async fn deleting_a_question_renumbers_the_rest() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let admin = test_support::insert_admin(ctx.state.db(), "reorder@test.io", "pass-word-1").await;
    let token = test_support::bearer_token(&admin.id, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/admin/exams",
            Some(&token),
            Some(json!({"title": "Reorder", "course": "RE-1", "duration_minutes": 30})),
        ))
        .await
        .expect("create exam");
    let created = test_support::read_json(response).await;
    let exam_id = created["data"]["id"].as_str().expect("exam id").to_string();

    let mut question_ids = Vec::new();
    for text in ["First", "Second", "Third"] {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/v1/admin/exams/{exam_id}/questions"),
                Some(&token),
                Some(question_payload(text)),
            ))
            .await
            .expect("add question");
        let body = test_support::read_json(response).await;
        question_ids.push(body["data"]["id"].as_str().expect("question id").to_string());
    }

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::DELETE,
            &format!("/api/v1/admin/exams/{exam_id}/questions/{}", question_ids[1]),
            Some(&token),
            None,
        ))
        .await
        .expect("delete middle question");
    assert_eq!(response.status(), StatusCode::OK);

    let questions = repositories::questions::list_by_exam(ctx.state.db(), &exam_id).await.unwrap();
    let orders: Vec<i32> = questions.iter().map(|question| question.order_index).collect();
    assert_eq!(orders, vec![1, 2]);
    assert_eq!(questions[0].question_text, "First");
    assert_eq!(questions[1].question_text, "Third");
}

#[tokio::test]
async fn exams_freeze_once_a_session_exists() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let admin = test_support::insert_admin(ctx.state.db(), "freeze@test.io", "pass-word-1").await;
    let student = test_support::insert_student(ctx.state.db(), "frozen@test.io", "pass-word-1").await;
    let (exam, questions) = test_support::insert_exam_with_questions(
        ctx.state.db(),
        "Frozen",
        60,
        vec![QuestionSpec::short_answer("Q1", "A1", 5)],
    )
    .await;

    let student_auth = test_support::bearer_token(&student.id, ctx.state.settings());
    ctx.app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/exams/{}/start", exam.id),
            Some(&student_auth),
            None,
        ))
        .await
        .expect("start exam");

    let admin_auth = test_support::bearer_token(&admin.id, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::PATCH,
            &format!("/api/v1/admin/exams/{}", exam.id),
            Some(&admin_auth),
            Some(json!({"title": "Renamed", "course": "RE-1", "duration_minutes": 90})),
        ))
        .await
        .expect("update frozen exam");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/admin/exams/{}/questions", exam.id),
            Some(&admin_auth),
            Some(question_payload("Late question")),
        ))
        .await
        .expect("add question to frozen exam");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::DELETE,
            &format!("/api/v1/admin/exams/{}/questions/{}", exam.id, questions[0].id),
            Some(&admin_auth),
            None,
        ))
        .await
        .expect("delete question of frozen exam");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::DELETE,
            &format!("/api/v1/admin/exams/{}", exam.id),
            Some(&admin_auth),
            None,
        ))
        .await
        .expect("delete frozen exam");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn students_cannot_reach_admin_endpoints() {
    let Some(ctx) = test_support::setup_test_context().await else { return };

    let student = test_support::insert_student(ctx.state.db(), "noadmin@test.io", "pass-word-1").await;
    let token = test_support::bearer_token(&student.id, ctx.state.settings());

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/admin/exams",
            Some(&token),
            Some(json!({"title": "Nope", "course": "NO-1", "duration_minutes": 30})),
        ))
        .await
        .expect("create exam as student");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
