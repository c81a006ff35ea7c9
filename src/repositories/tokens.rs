use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::SessionToken;

pub(crate) const COLUMNS: &str =
    "id, session_id, token, is_valid, created_at, invalidated_at";

/// Result of a token rotation: the freshly issued token plus the token
/// strings that were valid until this rotation (the caller fans out expiry
/// events to them).
pub(crate) struct RotatedToken {
    pub(crate) token: SessionToken,
    pub(crate) invalidated: Vec<String>,
}

/// Invalidates every valid token of the session and inserts a fresh one in
/// a single transaction, so at most one valid token exists at any instant.
pub(crate) async fn rotate(
    pool: &PgPool,
    session_id: &str,
    token_id: &str,
    token_value: &str,
    now: PrimitiveDateTime,
) -> Result<RotatedToken, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let invalidated = sqlx::query_scalar::<_, String>(
        "UPDATE session_tokens
         SET is_valid = FALSE, invalidated_at = $1
         WHERE session_id = $2 AND is_valid
         RETURNING token",
    )
    .bind(now)
    .bind(session_id)
    .fetch_all(&mut *tx)
    .await?;

    let token = sqlx::query_as::<_, SessionToken>(&format!(
        "INSERT INTO session_tokens (id, session_id, token, is_valid, created_at)
         VALUES ($1, $2, $3, TRUE, $4)
         RETURNING {COLUMNS}"
    ))
    .bind(token_id)
    .bind(session_id)
    .bind(token_value)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(RotatedToken { token, invalidated })
}

pub(crate) async fn find_by_token(
    pool: &PgPool,
    token: &str,
) -> Result<Option<SessionToken>, sqlx::Error> {
    sqlx::query_as::<_, SessionToken>(&format!(
        "SELECT {COLUMNS} FROM session_tokens WHERE token = $1"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_valid(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT token FROM session_tokens WHERE session_id = $1 AND is_valid",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn count_valid(pool: &PgPool, session_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM session_tokens WHERE session_id = $1 AND is_valid")
        .bind(session_id)
        .fetch_one(pool)
        .await
}
