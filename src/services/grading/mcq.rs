use std::collections::HashSet;

use super::{round2, GradeOutcome};
use crate::services::answers::decode_selection;

/// Structural multiple-choice grading. Single-select is all-or-nothing on
/// set equality; multi-select earns `c/n` of the points and loses `w/n`
/// for wrong picks, clamped at zero. Values compare case-sensitively.
pub(crate) fn grade(
    answer_text: &str,
    expected_answer: &str,
    max_points: i32,
    allow_multiple: bool,
) -> GradeOutcome {
    let student: HashSet<String> = decode_selection(answer_text).into_iter().collect();
    let expected: HashSet<String> = if allow_multiple {
        decode_selection(expected_answer).into_iter().collect()
    } else {
        std::iter::once(expected_answer.to_string()).collect()
    };
    let max_points = f64::from(max_points);

    if !allow_multiple {
        return if student == expected {
            GradeOutcome { score: max_points, feedback: "Correct answer selected.".to_string() }
        } else {
            GradeOutcome { score: 0.0, feedback: "Incorrect answer selected.".to_string() }
        };
    }

    let total_expected = expected.len();
    if total_expected == 0 {
        return GradeOutcome { score: 0.0, feedback: "No correct answer defined.".to_string() };
    }

    let correct_selected = student.intersection(&expected).count();
    let incorrect_selected = student.difference(&expected).count();

    let correct_score = (correct_selected as f64 / total_expected as f64) * max_points;
    let penalty = (incorrect_selected as f64 / total_expected as f64) * max_points;
    let score = round2((correct_score - penalty).max(0.0));

    let feedback = if score == max_points {
        "All correct answers selected.".to_string()
    } else if correct_selected > 0 {
        format!("{correct_selected} out of {total_expected} correct answers selected.")
    } else {
        "Incorrect answer(s) selected.".to_string()
    };

    GradeOutcome { score, feedback }
}
