use std::collections::{HashMap, HashSet};

use super::{round2, GradeOutcome};
use crate::core::config::GradingSettings;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// Keyword overlap blended with TF-IDF cosine similarity. Scores below the
/// threshold collapse to zero.
#[derive(Debug, Clone)]
pub(crate) struct LexicalGrader {
    keyword_weight: f64,
    similarity_weight: f64,
    similarity_threshold: f64,
}

impl LexicalGrader {
    pub(crate) fn new(keyword_weight: f64, similarity_weight: f64, similarity_threshold: f64) -> Self {
        Self { keyword_weight, similarity_weight, similarity_threshold }
    }

    pub(crate) fn from_settings(settings: &GradingSettings) -> Self {
        Self::new(settings.keyword_weight, settings.similarity_weight, settings.similarity_threshold)
    }

    pub(crate) fn grade(
        &self,
        answer_text: &str,
        expected_answer: &str,
        max_points: i32,
    ) -> GradeOutcome {
        let keyword_score = keyword_score(answer_text, expected_answer);
        let similarity_score = tfidf_cosine(answer_text, expected_answer);

        let mut combined =
            self.keyword_weight * keyword_score + self.similarity_weight * similarity_score;
        if combined < self.similarity_threshold {
            combined = 0.0;
        }

        let score = round2(combined * f64::from(max_points));
        GradeOutcome { score, feedback: feedback_for(combined).to_string() }
    }
}

fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch == '_' || ch.is_whitespace() { ch } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_keywords(text: &str) -> HashSet<String> {
    normalize_text(text)
        .split_whitespace()
        .filter(|word| word.len() > 2 && !STOP_WORDS.contains(word))
        .map(|word| word.to_string())
        .collect()
}

fn keyword_score(answer_text: &str, expected_answer: &str) -> f64 {
    let answer_keywords = extract_keywords(answer_text);
    let expected_keywords = extract_keywords(expected_answer);

    if expected_keywords.is_empty() {
        return 0.0;
    }

    let matched = answer_keywords.intersection(&expected_keywords).count();
    (matched as f64 / expected_keywords.len() as f64).min(1.0)
}

/// Word tokens of at least two characters, lowercased.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|token| token.chars().count() >= 2)
        .map(|token| token.to_string())
        .collect()
}

/// Cosine similarity between the two documents in a smoothed, L2-normalized
/// TF-IDF space built from just this pair.
fn tfidf_cosine(answer_text: &str, expected_answer: &str) -> f64 {
    if answer_text.trim().is_empty() || expected_answer.trim().is_empty() {
        return 0.0;
    }

    let docs = [tokenize(answer_text), tokenize(expected_answer)];
    if docs[0].is_empty() || docs[1].is_empty() {
        return 0.0;
    }

    let mut document_frequency: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for token in unique {
            *document_frequency.entry(token).or_insert(0) += 1;
        }
    }

    let n_docs = docs.len() as f64;
    let vectors: Vec<HashMap<&str, f64>> = docs
        .iter()
        .map(|doc| {
            let mut counts: HashMap<&str, f64> = HashMap::new();
            for token in doc {
                *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
            }
            let mut vector: HashMap<&str, f64> = counts
                .into_iter()
                .map(|(token, tf)| {
                    let df = document_frequency[token] as f64;
                    let idf = ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0;
                    (token, tf * idf)
                })
                .collect();

            let norm = vector.values().map(|weight| weight * weight).sum::<f64>().sqrt();
            if norm > 0.0 {
                for weight in vector.values_mut() {
                    *weight /= norm;
                }
            }
            vector
        })
        .collect();

    vectors[0]
        .iter()
        .filter_map(|(token, weight)| vectors[1].get(token).map(|other| weight * other))
        .sum()
}

fn feedback_for(combined_score: f64) -> &'static str {
    if combined_score >= 0.8 {
        "Excellent answer with strong keyword coverage and high similarity."
    } else if combined_score >= 0.6 {
        "Good answer with adequate keyword coverage."
    } else if combined_score >= 0.4 {
        "Fair answer with some relevant keywords."
    } else if combined_score >= 0.2 {
        "Weak answer with minimal keyword coverage."
    } else {
        "Answer does not meet the expected criteria."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grader() -> LexicalGrader {
        LexicalGrader::new(0.4, 0.6, 0.3)
    }

    #[test]
    fn identical_answer_earns_full_points() {
        let outcome =
            grader().grade("Python is a programming language", "Python is a programming language", 10);
        assert_eq!(outcome.score, 10.0);
        assert_eq!(
            outcome.feedback,
            "Excellent answer with strong keyword coverage and high similarity."
        );
    }

    #[test]
    fn unrelated_answer_falls_below_threshold() {
        let outcome = grader().grade("xyz", "Python is a programming language", 10);
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.feedback, "Answer does not meet the expected criteria.");
    }

    #[test]
    fn normalize_strips_punctuation_and_collapses_whitespace() {
        assert_eq!(normalize_text("  Hello,   WORLD!  "), "hello world");
    }

    #[test]
    fn keywords_drop_stop_words_and_short_tokens() {
        let keywords = extract_keywords("The cat sat on a mat by an old tree");
        assert!(keywords.contains("cat"));
        assert!(keywords.contains("mat"));
        assert!(keywords.contains("tree"));
        assert!(!keywords.contains("the"));
        assert!(!keywords.contains("on"));
        assert!(!keywords.contains("by"));
    }

    #[test]
    fn keyword_score_is_fraction_of_expected_keywords() {
        let score = keyword_score("compiled language", "Python interpreted language");
        // one of three expected keywords matched
        assert!((score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn keyword_score_empty_expected_is_zero() {
        assert_eq!(keyword_score("anything", "a an the"), 0.0);
    }

    #[test]
    fn cosine_is_one_for_identical_and_zero_for_disjoint() {
        assert!((tfidf_cosine("alpha beta gamma", "alpha beta gamma") - 1.0).abs() < 1e-9);
        assert_eq!(tfidf_cosine("alpha beta", "gamma delta"), 0.0);
        assert_eq!(tfidf_cosine("", "alpha"), 0.0);
    }

    #[test]
    fn cosine_grows_with_overlap() {
        let low = tfidf_cosine("alpha", "alpha beta gamma delta");
        let high = tfidf_cosine("alpha beta gamma", "alpha beta gamma delta");
        assert!(high > low);
        assert!(low > 0.0);
    }

    #[test]
    fn partial_answer_gets_partial_credit() {
        let outcome = grader().grade(
            "Python is an interpreted language",
            "Python is an interpreted, high-level programming language",
            10,
        );
        assert!(outcome.score > 0.0);
        assert!(outcome.score < 10.0);
    }
}
