use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{GradeHistory, GradedAnswer};
use crate::db::types::{GradeStatus, GradingMethod};

pub(crate) const COLUMNS: &str = "\
    id, student_id, exam_id, session_id, status, total_score, max_score, percentage, \
    answers_data, started_at, submitted_at, graded_at, grading_method, created_at";

pub(crate) struct CreateGrade<'a> {
    pub(crate) id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) session_id: &'a str,
    pub(crate) max_score: f64,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) grading_method: GradingMethod,
    pub(crate) created_at: PrimitiveDateTime,
}

/// Claims the single grade_history slot for a session. Returns None when a
/// record already exists, which suppresses duplicate grading runs.
pub(crate) async fn insert_in_progress(
    pool: &PgPool,
    params: CreateGrade<'_>,
) -> Result<Option<GradeHistory>, sqlx::Error> {
    sqlx::query_as::<_, GradeHistory>(&format!(
        "INSERT INTO grade_history
             (id, student_id, exam_id, session_id, status, max_score,
              started_at, submitted_at, grading_method, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (session_id) DO NOTHING
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.student_id)
    .bind(params.exam_id)
    .bind(params.session_id)
    .bind(GradeStatus::InProgress)
    .bind(params.max_score)
    .bind(params.started_at)
    .bind(params.submitted_at)
    .bind(params.grading_method)
    .bind(params.created_at)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn mark_completed(
    pool: &PgPool,
    id: &str,
    total_score: f64,
    percentage: f64,
    answers_data: Vec<GradedAnswer>,
    graded_at: PrimitiveDateTime,
) -> Result<GradeHistory, sqlx::Error> {
    sqlx::query_as::<_, GradeHistory>(&format!(
        "UPDATE grade_history
         SET status = $1, total_score = $2, percentage = $3, answers_data = $4, graded_at = $5
         WHERE id = $6
         RETURNING {COLUMNS}"
    ))
    .bind(GradeStatus::Completed)
    .bind(total_score)
    .bind(percentage)
    .bind(Json(answers_data))
    .bind(graded_at)
    .bind(id)
    .fetch_one(pool)
    .await
}

pub(crate) async fn mark_failed(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE grade_history SET status = $1 WHERE id = $2")
        .bind(GradeStatus::Failed)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) async fn find_by_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Option<GradeHistory>, sqlx::Error> {
    sqlx::query_as::<_, GradeHistory>(&format!(
        "SELECT {COLUMNS} FROM grade_history WHERE session_id = $1"
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_by_id_for_student(
    pool: &PgPool,
    id: &str,
    student_id: &str,
) -> Result<Option<GradeHistory>, sqlx::Error> {
    sqlx::query_as::<_, GradeHistory>(&format!(
        "SELECT {COLUMNS} FROM grade_history WHERE id = $1 AND student_id = $2"
    ))
    .bind(id)
    .bind(student_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_by_student(
    pool: &PgPool,
    student_id: &str,
    exam_id: Option<&str>,
) -> Result<Vec<GradeHistory>, sqlx::Error> {
    match exam_id {
        Some(exam_id) => {
            sqlx::query_as::<_, GradeHistory>(&format!(
                "SELECT {COLUMNS} FROM grade_history
                 WHERE student_id = $1 AND exam_id = $2
                 ORDER BY created_at DESC"
            ))
            .bind(student_id)
            .bind(exam_id)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, GradeHistory>(&format!(
                "SELECT {COLUMNS} FROM grade_history WHERE student_id = $1 ORDER BY created_at DESC"
            ))
            .bind(student_id)
            .fetch_all(pool)
            .await
        }
    }
}

pub(crate) async fn latest_completed_for_exam(
    pool: &PgPool,
    student_id: &str,
    exam_id: &str,
) -> Result<Option<GradeHistory>, sqlx::Error> {
    sqlx::query_as::<_, GradeHistory>(&format!(
        "SELECT {COLUMNS} FROM grade_history
         WHERE student_id = $1 AND exam_id = $2 AND status = $3
         ORDER BY created_at DESC
         LIMIT 1"
    ))
    .bind(student_id)
    .bind(exam_id)
    .bind(GradeStatus::Completed)
    .fetch_optional(pool)
    .await
}
