use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::core::state::AppState;
use crate::db::models::{GradeHistory, GradedAnswer};
use crate::db::types::GradingMethod;
use crate::repositories;
use crate::services::grading::{self, round2, FreeTextGrader};

/// Grades a completed session and persists the historical record. Exactly
/// one grade_history row exists per session: when another run already
/// claimed the slot, that record is returned untouched.
pub(crate) async fn grade_session(
    state: &AppState,
    session_id: &str,
    grading_method: GradingMethod,
) -> Result<GradeHistory> {
    let session = repositories::sessions::find_by_id(state.db(), session_id)
        .await
        .context("Failed to fetch session")?
        .context("Session not found")?;

    let max_score = repositories::exams::max_score(state.db(), &session.exam_id)
        .await
        .context("Failed to compute max score")?;

    let now = state.clock().now_primitive();
    let claimed = repositories::grades::insert_in_progress(
        state.db(),
        repositories::grades::CreateGrade {
            id: &uuid::Uuid::new_v4().to_string(),
            student_id: &session.student_id,
            exam_id: &session.exam_id,
            session_id: &session.id,
            max_score,
            started_at: session.started_at,
            submitted_at: session.submitted_at.or(Some(now)),
            grading_method,
            created_at: now,
        },
    )
    .await
    .context("Failed to create grade record")?;

    let Some(grade) = claimed else {
        // Another grading run owns this session's record.
        return repositories::grades::find_by_session(state.db(), session_id)
            .await
            .context("Failed to fetch grade record")?
            .context("Grade record vanished");
    };

    tracing::info!(
        session_id = %session.id,
        grading_method = ?grading_method,
        "Starting grading"
    );
    let timer = Instant::now();

    match run_pipeline(state, &session.id, &session.exam_id).await {
        Ok((total_score, answers_data)) => {
            let percentage =
                if max_score > 0.0 { round2(total_score / max_score * 100.0) } else { 0.0 };
            let graded_at = state.clock().now_primitive();
            let completed = repositories::grades::mark_completed(
                state.db(),
                &grade.id,
                total_score,
                percentage,
                answers_data,
                graded_at,
            )
            .await
            .context("Failed to finalize grade record")?;

            metrics::histogram!("grading_duration_seconds").record(timer.elapsed().as_secs_f64());
            tracing::info!(
                session_id = %session.id,
                total_score = completed.total_score,
                max_score = completed.max_score,
                "Grading completed"
            );
            Ok(completed)
        }
        Err(err) => {
            if let Err(mark_err) = repositories::grades::mark_failed(state.db(), &grade.id).await {
                tracing::error!(
                    grade_history_id = %grade.id,
                    error = %mark_err,
                    "Failed to mark grade record as failed"
                );
            }
            Err(err)
        }
    }
}

/// Walks the session's answers in question order. A grader failure on one
/// answer is absorbed as a zero score with error feedback; only
/// infrastructure failures abort the pipeline.
async fn run_pipeline(
    state: &AppState,
    session_id: &str,
    exam_id: &str,
) -> Result<(f64, Vec<GradedAnswer>)> {
    let questions = repositories::questions::list_by_exam(state.db(), exam_id)
        .await
        .context("Failed to fetch questions")?;
    let questions_by_id: HashMap<&str, _> =
        questions.iter().map(|question| (question.id.as_str(), question)).collect();

    let answers = repositories::answers::list_by_session_in_order(state.db(), session_id)
        .await
        .context("Failed to fetch answers")?;

    let grader = FreeTextGrader::from_settings(state.settings())
        .map_err(|err| anyhow::anyhow!(err.to_string()))
        .context("Failed to build free-text grader")?;

    let mut total_score = 0.0;
    let mut answers_data = Vec::with_capacity(answers.len());

    for answer in &answers {
        let Some(question) = questions_by_id.get(answer.question_id.as_str()) else {
            tracing::warn!(
                session_id,
                question_id = %answer.question_id,
                "Answer references a missing question; skipping"
            );
            continue;
        };

        let outcome = match grading::grade_answer(&grader, question, &answer.answer_text).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    session_id,
                    question_id = %question.id,
                    error = %err,
                    "Grader failed for answer"
                );
                grading::GradeOutcome { score: 0.0, feedback: format!("Grading error: {err}") }
            }
        };

        total_score += outcome.score;
        answers_data.push(GradedAnswer {
            question_id: question.id.clone(),
            order: question.order_index,
            question_text: question.question_text.clone(),
            question_type: question.question_type,
            expected_answer: question.expected_answer.clone(),
            options: question.options.0.clone(),
            student_answer: answer.answer_text.clone(),
            max_score: f64::from(question.points),
            score: outcome.score,
            feedback: outcome.feedback,
        });
    }

    Ok((round2(total_score), answers_data))
}
