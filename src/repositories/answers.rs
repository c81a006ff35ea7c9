use sqlx::{FromRow, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::StudentAnswer;

pub(crate) const COLUMNS: &str = "id, session_id, question_id, answer_text, answered_at";

#[derive(FromRow)]
struct UpsertedAnswer {
    #[sqlx(flatten)]
    answer: StudentAnswer,
    created: bool,
}

/// Inserts or replaces the unique (session_id, question_id) row. The
/// second element reports whether a new row was created (xmax = 0 only for
/// freshly inserted tuples).
pub(crate) async fn upsert(
    pool: &PgPool,
    id: &str,
    session_id: &str,
    question_id: &str,
    answer_text: &str,
    now: PrimitiveDateTime,
) -> Result<(StudentAnswer, bool), sqlx::Error> {
    let row = sqlx::query_as::<_, UpsertedAnswer>(&format!(
        "INSERT INTO student_answers ({COLUMNS})
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (session_id, question_id)
         DO UPDATE SET answer_text = EXCLUDED.answer_text, answered_at = EXCLUDED.answered_at
         RETURNING {COLUMNS}, (xmax = 0) AS created"
    ))
    .bind(id)
    .bind(session_id)
    .bind(question_id)
    .bind(answer_text)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok((row.answer, row.created))
}

pub(crate) async fn find_for_question(
    pool: &PgPool,
    session_id: &str,
    question_id: &str,
) -> Result<Option<StudentAnswer>, sqlx::Error> {
    sqlx::query_as::<_, StudentAnswer>(&format!(
        "SELECT {COLUMNS} FROM student_answers WHERE session_id = $1 AND question_id = $2"
    ))
    .bind(session_id)
    .bind(question_id)
    .fetch_optional(pool)
    .await
}

/// Answers joined to their questions, in question order; the grading
/// pipeline walks this.
pub(crate) async fn list_by_session_in_order(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<StudentAnswer>, sqlx::Error> {
    sqlx::query_as::<_, StudentAnswer>(&format!(
        "SELECT sa.id, sa.session_id, sa.question_id, sa.answer_text, sa.answered_at
         FROM student_answers sa
         JOIN questions q ON q.id = sa.question_id
         WHERE sa.session_id = $1
         ORDER BY q.order_index"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn count_by_session(pool: &PgPool, session_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM student_answers WHERE session_id = $1")
        .bind(session_id)
        .fetch_one(pool)
        .await
}

pub(crate) async fn answered_orders(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<i32>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT q.order_index
         FROM student_answers sa
         JOIN questions q ON q.id = sa.question_id
         WHERE sa.session_id = $1
         ORDER BY q.order_index",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}
