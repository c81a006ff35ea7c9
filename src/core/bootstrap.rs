use anyhow::{Context, Result};
use uuid::Uuid;

use crate::core::{security, state::AppState};
use crate::repositories;

/// Seeds the first superuser account so the admin API is reachable on a
/// fresh database. Skipped when no password is configured.
pub(crate) async fn ensure_superuser(state: &AppState) -> Result<()> {
    let admin = state.settings().admin();
    if admin.first_superuser_password.is_empty() {
        tracing::info!("FIRST_SUPERUSER_PASSWORD not set; skipping superuser bootstrap");
        return Ok(());
    }

    let existing = repositories::users::find_by_email(state.db(), &admin.first_superuser_email)
        .await
        .context("Failed to look up superuser")?;
    if existing.is_some() {
        return Ok(());
    }

    let hashed_password = security::hash_password(&admin.first_superuser_password)
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    let now = state.clock().now_primitive();

    repositories::users::create(
        state.db(),
        repositories::users::CreateUser {
            id: &Uuid::new_v4().to_string(),
            email: &admin.first_superuser_email,
            hashed_password: &hashed_password,
            full_name: "Administrator",
            is_student: false,
            is_superuser: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .context("Failed to create superuser")?;

    tracing::info!(email = %admin.first_superuser_email, "Default superuser created");
    Ok(())
}
