use thiserror::Error;

use crate::db::models::Question;
use crate::db::types::QuestionType;

#[derive(Debug, Error)]
pub(crate) enum AnswerError {
    #[error("{0}")]
    Invalid(String),
}

/// Normalizes an incoming answer for storage based on the question type.
/// Free text is stored verbatim; multiple-choice answers are decoded,
/// deduplicated and checked against the option values. A single surviving
/// selection is stored as a plain string, several as a JSON array.
pub(crate) fn normalize_answer(question: &Question, answer_text: &str) -> Result<String, AnswerError> {
    if question.question_type != QuestionType::MultipleChoice {
        return Ok(answer_text.to_string());
    }

    let mut selections = decode_selection(answer_text);
    dedupe_in_place(&mut selections);

    if selections.is_empty() {
        return Err(AnswerError::Invalid("At least one option must be selected.".to_string()));
    }

    let option_values = question.option_values();
    for selection in &selections {
        if !option_values.contains(&selection.as_str()) {
            let options = question
                .options
                .0
                .iter()
                .map(|option| format!("{}: {}", option.label, option.value))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(AnswerError::Invalid(format!(
                "Invalid answer \"{selection}\" for question {}. Answer must be one of: {options}",
                question.id
            )));
        }
    }

    if !question.allow_multiple && selections.len() > 1 {
        return Err(AnswerError::Invalid(format!(
            "Question {} only allows a single answer.",
            question.id
        )));
    }

    if selections.len() == 1 {
        return Ok(selections.remove(0));
    }

    serde_json::to_string(&selections)
        .map_err(|_| AnswerError::Invalid("Failed to encode answer.".to_string()))
}

/// Lenient decode shared with the MCQ grader: a JSON array of strings, or
/// the raw string as a singleton.
pub(crate) fn decode_selection(answer_text: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(answer_text) {
        Ok(values) => values,
        Err(_) => vec![answer_text.to_string()],
    }
}

fn dedupe_in_place(values: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|value| seen.insert(value.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::QuestionOption;
    use sqlx::types::Json;

    fn mcq_question(allow_multiple: bool) -> Question {
        Question {
            id: "q-1".to_string(),
            exam_id: "e-1".to_string(),
            question_text: "Pick".to_string(),
            question_type: QuestionType::MultipleChoice,
            expected_answer: "opt1".to_string(),
            options: Json(vec![
                QuestionOption { label: "A".to_string(), value: "opt1".to_string() },
                QuestionOption { label: "B".to_string(), value: "opt2".to_string() },
                QuestionOption { label: "C".to_string(), value: "opt3".to_string() },
            ]),
            allow_multiple,
            points: 5,
            order_index: 1,
        }
    }

    fn text_question() -> Question {
        Question {
            question_type: QuestionType::ShortAnswer,
            options: Json(Vec::new()),
            allow_multiple: false,
            ..mcq_question(false)
        }
    }

    #[test]
    fn free_text_is_stored_verbatim() {
        let question = text_question();
        let stored = normalize_answer(&question, "  Python is great  ").expect("normalize");
        assert_eq!(stored, "  Python is great  ");
    }

    #[test]
    fn single_select_accepts_exact_option_value() {
        let question = mcq_question(false);
        assert_eq!(normalize_answer(&question, "opt1").unwrap(), "opt1");
    }

    #[test]
    fn single_select_rejects_unknown_value() {
        let question = mcq_question(false);
        let err = normalize_answer(&question, "nope").unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn single_select_rejects_multiple_values() {
        let question = mcq_question(false);
        let err = normalize_answer(&question, r#"["opt1","opt2"]"#).unwrap_err();
        assert!(err.to_string().contains("single answer"));
    }

    #[test]
    fn multi_select_reencodes_as_json_array() {
        let question = mcq_question(true);
        let stored = normalize_answer(&question, r#"["opt1","opt3"]"#).expect("normalize");
        assert_eq!(stored, r#"["opt1","opt3"]"#);
    }

    #[test]
    fn multi_select_dedupes_and_collapses_singleton() {
        let question = mcq_question(true);
        let stored = normalize_answer(&question, r#"["opt2","opt2"]"#).expect("normalize");
        assert_eq!(stored, "opt2");
    }

    #[test]
    fn multi_select_rejects_empty_array() {
        let question = mcq_question(true);
        let err = normalize_answer(&question, "[]").unwrap_err();
        assert!(err.to_string().contains("At least one option"));
    }

    #[test]
    fn multi_select_values_are_case_sensitive() {
        let question = mcq_question(true);
        assert!(normalize_answer(&question, r#"["OPT1"]"#).is_err());
    }
}
