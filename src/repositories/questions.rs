use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::models::{Question, QuestionOption};
use crate::db::types::QuestionType;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, question_text, question_type, expected_answer, options, \
    allow_multiple, points, order_index";

pub(crate) struct CreateQuestion<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) question_text: &'a str,
    pub(crate) question_type: QuestionType,
    pub(crate) expected_answer: &'a str,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) allow_multiple: bool,
    pub(crate) points: i32,
    pub(crate) order_index: i32,
}

pub(crate) struct UpdateQuestion<'a> {
    pub(crate) question_text: &'a str,
    pub(crate) question_type: QuestionType,
    pub(crate) expected_answer: &'a str,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) allow_multiple: bool,
    pub(crate) points: i32,
}

pub(crate) async fn create(
    pool: &PgPool,
    params: CreateQuestion<'_>,
) -> Result<Question, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "INSERT INTO questions ({COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.question_text)
    .bind(params.question_type)
    .bind(params.expected_answer)
    .bind(Json(params.options))
    .bind(params.allow_multiple)
    .bind(params.points)
    .bind(params.order_index)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!("SELECT {COLUMNS} FROM questions WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_by_exam_and_order(
    pool: &PgPool,
    exam_id: &str,
    order_index: i32,
) -> Result<Option<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {COLUMNS} FROM questions WHERE exam_id = $1 AND order_index = $2"
    ))
    .bind(exam_id)
    .bind(order_index)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {COLUMNS} FROM questions WHERE exam_id = $1 ORDER BY order_index"
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn count_by_exam(pool: &PgPool, exam_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE exam_id = $1")
        .bind(exam_id)
        .fetch_one(pool)
        .await
}

pub(crate) async fn next_order_index(pool: &PgPool, exam_id: &str) -> Result<i32, sqlx::Error> {
    let max: Option<i32> =
        sqlx::query_scalar("SELECT MAX(order_index) FROM questions WHERE exam_id = $1")
            .bind(exam_id)
            .fetch_one(pool)
            .await?;
    Ok(max.unwrap_or(0) + 1)
}

pub(crate) async fn update(
    pool: &PgPool,
    id: &str,
    params: UpdateQuestion<'_>,
) -> Result<Option<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "UPDATE questions
         SET question_text = $1, question_type = $2, expected_answer = $3, options = $4,
             allow_multiple = $5, points = $6
         WHERE id = $7
         RETURNING {COLUMNS}"
    ))
    .bind(params.question_text)
    .bind(params.question_type)
    .bind(params.expected_answer)
    .bind(Json(params.options))
    .bind(params.allow_multiple)
    .bind(params.points)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Deletes a question and renumbers the remainder so orders stay a
/// contiguous 1-indexed sequence. The unique (exam_id, order_index)
/// constraint is deferred, so the shift happens inside one transaction.
pub(crate) async fn delete_and_renumber(
    pool: &PgPool,
    exam_id: &str,
    question_id: &str,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM questions WHERE id = $1 AND exam_id = $2")
        .bind(question_id)
        .bind(exam_id)
        .execute(&mut *tx)
        .await?;

    if deleted.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        "WITH ranked AS (
            SELECT id, ROW_NUMBER() OVER (ORDER BY order_index) AS new_order
            FROM questions
            WHERE exam_id = $1
        )
        UPDATE questions q
        SET order_index = ranked.new_order
        FROM ranked
        WHERE q.id = ranked.id AND q.order_index <> ranked.new_order",
    )
    .bind(exam_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}
