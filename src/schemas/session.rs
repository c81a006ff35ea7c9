use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::{ExamSession, SessionToken, StudentAnswer};
use crate::schemas::exam::QuestionPublicResponse;
use crate::services::sessions::Progress;

#[derive(Debug, Serialize)]
pub(crate) struct SessionWithTokenResponse {
    pub(crate) session_id: String,
    pub(crate) exam_id: String,
    pub(crate) started_at: String,
    pub(crate) expires_at: String,
    pub(crate) time_remaining_seconds: i64,
    pub(crate) current_question_order: i32,
    pub(crate) token: String,
}

impl SessionWithTokenResponse {
    pub(crate) fn from_db(
        session: &ExamSession,
        token: &SessionToken,
        time_remaining_seconds: i64,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            exam_id: session.exam_id.clone(),
            started_at: format_primitive(session.started_at),
            expires_at: format_primitive(session.expires_at),
            time_remaining_seconds,
            current_question_order: session.current_question_order,
            token: token.token.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionDetailResponse {
    #[serde(flatten)]
    pub(crate) question: QuestionPublicResponse,
    pub(crate) saved_answer: Option<String>,
    pub(crate) progress: Progress,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnswerTextInput {
    #[serde(default)]
    pub(crate) answer_text: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerSubmitResponse {
    pub(crate) question_order: i32,
    pub(crate) answer_text: String,
    pub(crate) answered_at: String,
    pub(crate) progress: Progress,
}

impl AnswerSubmitResponse {
    pub(crate) fn from_db(order: i32, answer: StudentAnswer, progress: Progress) -> Self {
        Self {
            question_order: order,
            answer_text: answer.answer_text,
            answered_at: format_primitive(answer.answered_at),
            progress,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitSessionResponse {
    pub(crate) session_id: String,
    pub(crate) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) grade_history_id: Option<String>,
}
