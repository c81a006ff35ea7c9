use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::api::guards::resolve_bearer;
use crate::core::state::AppState;
use crate::db::models::{ExamSession, User};
use crate::repositories;
use crate::services::events::{CompletionReason, ExpiryReason, SessionEvent};
use crate::services::sessions::{self, SessionError, TokenRejection, TokenStatus};

/// Token invalid or expired.
pub(crate) const CLOSE_TOKEN_INVALID: u16 = 4001;
/// Authentication or ownership failure.
pub(crate) const CLOSE_AUTH_FAILED: u16 = 4003;

#[derive(Debug, Deserialize)]
struct WsAuthQuery {
    #[serde(default)]
    access_token: Option<String>,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/exam/:token", get(ws_upgrade))
}

/// Browsers cannot set headers on WebSocket handshakes, so the bearer
/// token is accepted from the query string as well.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(token): Path<String>,
    Query(auth): Query<WsAuthQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.to_string())
        .or(auth.access_token);

    let user = match bearer {
        Some(bearer) => resolve_bearer(&state, &bearer).await.ok(),
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(state, socket, token, user))
}

async fn handle_socket(state: AppState, mut socket: WebSocket, token: String, user: Option<User>) {
    let Some(user) = user else {
        close_with(&mut socket, CLOSE_AUTH_FAILED, "Not authenticated").await;
        return;
    };

    let session = match sessions::check_token(&state, &token).await {
        Ok(TokenStatus::Valid(session)) => session,
        Ok(TokenStatus::Rejected(rejection)) => {
            send_event(&mut socket, &rejection_event(rejection)).await;
            close_with(&mut socket, CLOSE_TOKEN_INVALID, "Invalid session token").await;
            return;
        }
        Err(err) => {
            tracing::error!(error = %err, "Token check failed during WebSocket connect");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    if session.student_id != user.id {
        close_with(&mut socket, CLOSE_AUTH_FAILED, "Access denied").await;
        return;
    }

    run_session(state, socket, token, session).await;
}

async fn run_session(state: AppState, mut socket: WebSocket, token: String, session: ExamSession) {
    let mut events = state.events().subscribe(&token);

    match session_counters(&state, &session).await {
        Ok((time_remaining, answered, total)) => {
            let connected = json!({
                "type": "connected",
                "time_remaining_seconds": time_remaining,
                "answered_count": answered,
                "total_questions": total,
            });
            if socket.send(Message::Text(connected.to_string())).await.is_err() {
                state.events().prune(&token);
                return;
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to load session counters");
            let _ = socket.send(Message::Close(None)).await;
            state.events().prune(&token);
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if handle_client_message(&state, &mut socket, &token, &text).await.is_break() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let terminal_expiry = matches!(event, SessionEvent::SessionExpired { .. });
                        send_event(&mut socket, &event).await;
                        if terminal_expiry {
                            close_with(&mut socket, CLOSE_TOKEN_INVALID, "Session token invalidated").await;
                        } else {
                            let _ = socket.send(Message::Close(None)).await;
                        }
                        break;
                    }
                    // Fell too far behind the bus; the client recovers by
                    // polling HTTP state.
                    Err(RecvError::Lagged(_)) => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    state.events().prune(&token);
}

async fn handle_client_message(
    state: &AppState,
    socket: &mut WebSocket,
    token: &str,
    text: &str,
) -> std::ops::ControlFlow<()> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return std::ops::ControlFlow::Continue(());
    };

    if value.get("type").and_then(|kind| kind.as_str()) != Some("ping") {
        return std::ops::ControlFlow::Continue(());
    }

    match sessions::check_token(state, token).await {
        Ok(TokenStatus::Valid(session)) => match session_counters(state, &session).await {
            Ok((time_remaining, answered, _total)) => {
                let pong = json!({
                    "type": "pong",
                    "time_remaining_seconds": time_remaining,
                    "answered_count": answered,
                });
                let _ = socket.send(Message::Text(pong.to_string())).await;
                std::ops::ControlFlow::Continue(())
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to load session counters for pong");
                std::ops::ControlFlow::Continue(())
            }
        },
        Ok(TokenStatus::Rejected(rejection)) => {
            send_event(socket, &rejection_event(rejection)).await;
            close_with(socket, CLOSE_TOKEN_INVALID, "Invalid session token").await;
            std::ops::ControlFlow::Break(())
        }
        Err(err) => {
            tracing::error!(error = %err, "Token check failed during ping");
            std::ops::ControlFlow::Continue(())
        }
    }
}

/// Terminal message sent when a presented or revalidated token is no
/// longer usable.
fn rejection_event(rejection: TokenRejection) -> SessionEvent {
    match rejection {
        TokenRejection::TokenExpired => SessionEvent::SessionExpired {
            message: "This session token has expired. A new session was started.".to_string(),
            reason: ExpiryReason::TokenExpired,
        },
        TokenRejection::InvalidToken => SessionEvent::SessionExpired {
            message: "Invalid session token.".to_string(),
            reason: ExpiryReason::InvalidToken,
        },
        TokenRejection::SessionCompleted => SessionEvent::SessionCompleted {
            message: "This exam has already been submitted.".to_string(),
            reason: CompletionReason::SessionCompleted,
            grade_history_id: None,
        },
        TokenRejection::SessionTimeout => SessionEvent::SessionCompleted {
            message: "Exam time has ended.".to_string(),
            reason: CompletionReason::Timeout,
            grade_history_id: None,
        },
    }
}

async fn session_counters(
    state: &AppState,
    session: &ExamSession,
) -> Result<(i64, i64, i64), SessionError> {
    let answered = repositories::answers::count_by_session(state.db(), &session.id).await?;
    let total = repositories::questions::count_by_exam(state.db(), &session.exam_id).await?;
    let time_remaining = session.time_remaining_seconds(state.clock().now_primitive());
    Ok((time_remaining, answered, total))
}

async fn send_event(socket: &mut WebSocket, event: &SessionEvent) {
    if let Ok(payload) = serde_json::to_string(event) {
        let _ = socket.send(Message::Text(payload)).await;
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame { code, reason: reason.into() };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_events_carry_spec_reasons() {
        let event = rejection_event(TokenRejection::TokenExpired);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_expired");
        assert_eq!(json["reason"], "token_expired");

        let event = rejection_event(TokenRejection::InvalidToken);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_expired");
        assert_eq!(json["reason"], "invalid_token");

        let event = rejection_event(TokenRejection::SessionCompleted);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_completed");
        assert_eq!(json["reason"], "session_completed");

        let event = rejection_event(TokenRejection::SessionTimeout);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_completed");
        assert_eq!(json["reason"], "timeout");
    }

    #[test]
    fn close_codes_match_contract() {
        assert_eq!(CLOSE_TOKEN_INVALID, 4001);
        assert_eq!(CLOSE_AUTH_FAILED, 4003);
    }
}
