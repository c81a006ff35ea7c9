use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ExamSession;
use crate::db::types::SubmissionType;

pub(crate) const COLUMNS: &str = "\
    id, student_id, exam_id, started_at, expires_at, is_completed, \
    submitted_at, submission_type, current_question_order";

pub(crate) struct CreateSession<'a> {
    pub(crate) id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) expires_at: PrimitiveDateTime,
}

/// Outcome of `mark_completed_if_not_already`: whether this call won the
/// active -> completed transition, and which tokens it invalidated.
pub(crate) struct CompletionTransition {
    pub(crate) did_transition: bool,
    pub(crate) invalidated_tokens: Vec<String>,
}

/// Returns false when the unique (student_id, exam_id) row already exists;
/// the caller re-reads the winner's session.
pub(crate) async fn create(pool: &PgPool, params: CreateSession<'_>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO exam_sessions (id, student_id, exam_id, started_at, expires_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (student_id, exam_id) DO NOTHING",
    )
    .bind(params.id)
    .bind(params.student_id)
    .bind(params.exam_id)
    .bind(params.started_at)
    .bind(params.expires_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_by_student_and_exam(
    pool: &PgPool,
    student_id: &str,
    exam_id: &str,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions WHERE student_id = $1 AND exam_id = $2"
    ))
    .bind(student_id)
    .bind(exam_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn set_current_question_order(
    pool: &PgPool,
    id: &str,
    order_index: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE exam_sessions SET current_question_order = $1 WHERE id = $2")
        .bind(order_index)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// The sole synchronization point for submit-once semantics: flips
/// `is_completed` exactly once and invalidates any remaining valid tokens,
/// all inside one transaction.
pub(crate) async fn mark_completed_if_not_already(
    pool: &PgPool,
    id: &str,
    submission_type: SubmissionType,
    now: PrimitiveDateTime,
) -> Result<CompletionTransition, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query_scalar::<_, String>(
        "UPDATE exam_sessions
         SET is_completed = TRUE, submitted_at = $1, submission_type = $2
         WHERE id = $3 AND is_completed = FALSE
         RETURNING id",
    )
    .bind(now)
    .bind(submission_type)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    if updated.is_none() {
        tx.rollback().await?;
        return Ok(CompletionTransition { did_transition: false, invalidated_tokens: Vec::new() });
    }

    let invalidated_tokens = sqlx::query_scalar::<_, String>(
        "UPDATE session_tokens
         SET is_valid = FALSE, invalidated_at = $1
         WHERE session_id = $2 AND is_valid
         RETURNING token",
    )
    .bind(now)
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(CompletionTransition { did_transition: true, invalidated_tokens })
}

/// Sessions the sweeper must auto-submit.
pub(crate) async fn list_expired_incomplete(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Vec<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions WHERE is_completed = FALSE AND expires_at <= $1"
    ))
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Incomplete sessions with a future deadline; used to re-arm one-shot
/// timers after a process restart.
pub(crate) async fn list_incomplete(pool: &PgPool) -> Result<Vec<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions WHERE is_completed = FALSE"
    ))
    .fetch_all(pool)
    .await
}
