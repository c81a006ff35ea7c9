use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{GradeStatus, GradingMethod, QuestionType, SubmissionType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct User {
    pub(crate) id: String,
    pub(crate) email: String,
    #[serde(skip_serializing)]
    pub(crate) hashed_password: String,
    pub(crate) full_name: String,
    pub(crate) is_student: bool,
    pub(crate) is_superuser: bool,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) course: String,
    pub(crate) duration_minutes: i32,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QuestionOption {
    pub(crate) label: String,
    pub(crate) value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) expected_answer: String,
    pub(crate) options: Json<Vec<QuestionOption>>,
    pub(crate) allow_multiple: bool,
    pub(crate) points: i32,
    pub(crate) order_index: i32,
}

impl Question {
    pub(crate) fn option_values(&self) -> Vec<&str> {
        self.options.0.iter().map(|option| option.value.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamSession {
    pub(crate) id: String,
    pub(crate) student_id: String,
    pub(crate) exam_id: String,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) expires_at: PrimitiveDateTime,
    pub(crate) is_completed: bool,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) submission_type: Option<SubmissionType>,
    pub(crate) current_question_order: i32,
}

impl ExamSession {
    pub(crate) fn is_expired(&self, now: PrimitiveDateTime) -> bool {
        now > self.expires_at
    }

    pub(crate) fn is_active(&self, now: PrimitiveDateTime) -> bool {
        !self.is_completed && !self.is_expired(now)
    }

    pub(crate) fn time_remaining_seconds(&self, now: PrimitiveDateTime) -> i64 {
        if self.is_expired(now) {
            return 0;
        }
        (self.expires_at.assume_utc() - now.assume_utc()).whole_seconds()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct SessionToken {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) token: String,
    pub(crate) is_valid: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) invalidated_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct StudentAnswer {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) question_id: String,
    pub(crate) answer_text: String,
    pub(crate) answered_at: PrimitiveDateTime,
}

/// Snapshot of one graded answer, persisted inside `grade_history` so the
/// record survives later question edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GradedAnswer {
    pub(crate) question_id: String,
    pub(crate) order: i32,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) expected_answer: String,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) student_answer: String,
    pub(crate) max_score: f64,
    pub(crate) score: f64,
    pub(crate) feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradeHistory {
    pub(crate) id: String,
    pub(crate) student_id: String,
    pub(crate) exam_id: String,
    pub(crate) session_id: String,
    pub(crate) status: GradeStatus,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) answers_data: Json<Vec<GradedAnswer>>,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) grading_method: GradingMethod,
    pub(crate) created_at: PrimitiveDateTime,
}
