use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Exam, Question, QuestionOption};
use crate::db::types::QuestionType;
use crate::services::sessions::{ActiveSessionInfo, GradeInfo};

#[derive(Debug, Serialize)]
pub(crate) struct ExamResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) course: String,
    pub(crate) duration_minutes: i32,
    pub(crate) is_active: bool,
    pub(crate) question_count: i64,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) active_session: Option<ActiveSessionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) grade_info: Option<GradeInfo>,
}

impl ExamResponse {
    pub(crate) fn from_db(exam: Exam, question_count: i64) -> Self {
        Self {
            id: exam.id,
            title: exam.title,
            description: exam.description,
            course: exam.course,
            duration_minutes: exam.duration_minutes,
            is_active: exam.is_active,
            question_count,
            created_at: format_primitive(exam.created_at),
            updated_at: format_primitive(exam.updated_at),
            active_session: None,
            grade_info: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: String,
    #[validate(length(min = 1, max = 100, message = "course must be 1-100 characters"))]
    pub(crate) course: String,
    #[validate(range(min = 1, message = "duration_minutes must be at least 1"))]
    pub(crate) duration_minutes: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamUpdate {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: String,
    #[validate(length(min = 1, max = 100, message = "course must be 1-100 characters"))]
    pub(crate) course: String,
    #[validate(range(min = 1, message = "duration_minutes must be at least 1"))]
    pub(crate) duration_minutes: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionCreate {
    #[validate(length(min = 1, message = "question_text is required"))]
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    #[validate(length(min = 1, message = "expected_answer is required"))]
    pub(crate) expected_answer: String,
    #[serde(default)]
    pub(crate) options: Vec<QuestionOption>,
    #[serde(default)]
    pub(crate) allow_multiple: bool,
    #[validate(range(min = 1, message = "points must be at least 1"))]
    pub(crate) points: i32,
}

/// Admin view of a question, expected answer included.
#[derive(Debug, Serialize)]
pub(crate) struct QuestionAdminResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) order: i32,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) expected_answer: String,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) allow_multiple: bool,
    pub(crate) points: i32,
}

impl QuestionAdminResponse {
    pub(crate) fn from_db(question: Question) -> Self {
        Self {
            id: question.id,
            exam_id: question.exam_id,
            order: question.order_index,
            question_text: question.question_text,
            question_type: question.question_type,
            expected_answer: question.expected_answer,
            options: question.options.0,
            allow_multiple: question.allow_multiple,
            points: question.points,
        }
    }
}

/// Student view of a question; the expected answer never leaves the
/// server.
#[derive(Debug, Serialize)]
pub(crate) struct QuestionPublicResponse {
    pub(crate) id: String,
    pub(crate) order: i32,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) allow_multiple: bool,
    pub(crate) points: i32,
}

impl QuestionPublicResponse {
    pub(crate) fn from_db(question: Question) -> Self {
        Self {
            id: question.id,
            order: question.order_index,
            question_text: question.question_text,
            question_type: question.question_type,
            options: question.options.0,
            allow_multiple: question.allow_multiple,
            points: question.points,
        }
    }
}
