use anyhow::{Context, Result};
use time::PrimitiveDateTime;

use crate::core::state::AppState;
use crate::db::types::SubmissionType;
use crate::repositories;
use crate::services::events::CompletionReason;
use crate::services::sessions;

/// Arms a one-shot timer that fires at the session's exact deadline and
/// auto-submits it. Early wakeups re-arm for the stored `expires_at`; the
/// periodic sweeper catches anything this timer misses.
pub(crate) fn schedule_auto_submit(
    state: AppState,
    session_id: String,
    expires_at: PrimitiveDateTime,
) {
    tokio::spawn(async move {
        let mut eta = expires_at;
        loop {
            sleep_until(&state, eta).await;

            match auto_submit(&state, &session_id).await {
                Ok(Some(next_eta)) => eta = next_eta,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %err,
                        "Auto-submit task failed; the sweeper will retry"
                    );
                    break;
                }
            }
        }
    });
}

async fn sleep_until(state: &AppState, eta: PrimitiveDateTime) {
    let now = state.clock().now_utc();
    let delay = eta.assume_utc() - now;
    if delay.is_positive() {
        let millis = delay.whole_milliseconds().max(0) as u64;
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
    }
}

/// The deferred task body. Idempotent: completed sessions are left alone,
/// sessions that have not actually expired yet ask to be re-armed for
/// their deadline, everything else is completed and graded as
/// `auto_expired`.
pub(crate) async fn auto_submit(
    state: &AppState,
    session_id: &str,
) -> Result<Option<PrimitiveDateTime>> {
    let Some(session) = repositories::sessions::find_by_id(state.db(), session_id)
        .await
        .context("Failed to fetch session")?
    else {
        tracing::warn!(session_id, "Session not found for auto-submit");
        return Ok(None);
    };

    if session.is_completed {
        tracing::info!(session_id, "Session already completed; skipping auto-submit");
        return Ok(None);
    }

    if !session.is_expired(state.clock().now_primitive()) {
        tracing::warn!(session_id, "Session not yet expired; rescheduling auto-submit");
        return Ok(Some(session.expires_at));
    }

    let valid_tokens = repositories::tokens::list_valid(state.db(), session_id)
        .await
        .context("Failed to fetch valid tokens")?;

    sessions::complete_and_grade(
        state,
        session_id,
        CompletionReason::Timeout,
        valid_tokens,
        SubmissionType::AutoExpired,
    )
    .await
    .map_err(|err| anyhow::anyhow!(err.to_string()))
    .context("Failed to complete expired session")?;

    Ok(None)
}

/// Safety net behind the one-shot timers: completes every session whose
/// deadline has passed without a submission.
pub(crate) async fn sweep_expired(state: &AppState) -> Result<usize> {
    let now = state.clock().now_primitive();
    let expired = repositories::sessions::list_expired_incomplete(state.db(), now)
        .await
        .context("Failed to list expired sessions")?;

    let mut completed = 0;
    for session in expired {
        match auto_submit(state, &session.id).await {
            Ok(None) => completed += 1,
            Ok(Some(_)) => {}
            Err(err) => {
                tracing::error!(
                    session_id = %session.id,
                    error = %err,
                    "Sweeper failed to auto-submit session"
                );
            }
        }
    }

    if completed > 0 {
        tracing::info!(count = completed, "Sweeper auto-submitted expired sessions");
    }

    Ok(completed)
}

/// Re-arms one-shot timers for sessions that were still running when the
/// process last stopped.
pub(crate) async fn rearm_pending(state: &AppState) -> Result<usize> {
    let pending = repositories::sessions::list_incomplete(state.db())
        .await
        .context("Failed to list incomplete sessions")?;

    let count = pending.len();
    for session in pending {
        schedule_auto_submit(state.clone(), session.id, session.expires_at);
    }

    if count > 0 {
        tracing::info!(count, "Re-armed auto-submit timers for pending sessions");
    }

    Ok(count)
}
