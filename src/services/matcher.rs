// src/services/matcher.rs

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::question::{Answer, FeedbackTag, Question, QuestionKind};

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid punctuation pattern"));

/// Outcome of comparing a learner's answer set with the correct set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Correct,
    PartlyCorrect,
    Incorrect,
}

/// Lower-cases the input and replaces punctuation with spaces.
pub fn normalize(input: &str) -> String {
    PUNCTUATION
        .replace_all(&input.to_lowercase(), " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps free-text learner input onto the answer identifiers of one question.
pub struct AnswerMatcher {
    /// Normalized identifier or answer text -> identifier.
    tokens: HashMap<String, String>,
    correct: BTreeSet<String>,
}

impl AnswerMatcher {
    pub fn new(answers: &[Answer]) -> Self {
        let mut tokens = HashMap::new();
        // Texts first so that an identifier always wins over an equal text.
        for answer in answers {
            let text = normalize(&answer.text);
            if !text.is_empty() {
                tokens.insert(text, answer.ident.clone());
            }
        }
        for answer in answers {
            tokens.insert(normalize(&answer.ident), answer.ident.clone());
        }

        let correct = answers
            .iter()
            .filter(|a| a.is_correct)
            .map(|a| a.ident.clone())
            .collect();

        Self { tokens, correct }
    }

    /// Identifiers named by the learner. Unknown tokens are ignored.
    pub fn selected(&self, input: &str) -> BTreeSet<String> {
        let normalized = normalize(input);

        // A multi-word answer text typed out in full.
        if let Some(ident) = self.tokens.get(&normalized) {
            return BTreeSet::from([ident.clone()]);
        }

        normalized
            .split_whitespace()
            .filter(|token| *token != "and")
            .filter_map(|token| self.tokens.get(token).cloned())
            .collect()
    }

    pub fn classify(&self, input: &str) -> Classification {
        classify_sets(&self.selected(input), &self.correct)
    }
}

pub fn classify_sets(selected: &BTreeSet<String>, correct: &BTreeSet<String>) -> Classification {
    if selected.is_empty() {
        Classification::Incorrect
    } else if selected == correct {
        Classification::Correct
    } else if selected.intersection(correct).next().is_some() {
        Classification::PartlyCorrect
    } else {
        Classification::Incorrect
    }
}

/// Grading result for one submitted answer.
#[derive(Debug, Clone)]
pub struct Grade {
    /// `None` for essay questions, which are not classified.
    pub classification: Option<Classification>,
    pub reply: String,
}

/// Grades `input` against `question` and builds the reply text.
pub fn grade(question: &Question, input: &str) -> Grade {
    match question.kind {
        QuestionKind::Essay => {
            let reply = match question.feedback_for(FeedbackTag::ModelAnswer) {
                Some(model) => format!("Thank you for your answer.\nModel answer: {}", model),
                None => "Thank you for your answer.\nThere is no model answer for this question."
                    .to_string(),
            };
            Grade {
                classification: None,
                reply,
            }
        }
        QuestionKind::MultipleChoice | QuestionKind::MultipleCorrect | QuestionKind::TrueFalse => {
            let classification = AnswerMatcher::new(&question.answers).classify(input);
            let verdict = match classification {
                Classification::Correct => "Correct!",
                Classification::PartlyCorrect => "Partly correct.",
                Classification::Incorrect => "Incorrect.",
            };
            Grade {
                classification: Some(classification),
                reply: format!("{}\n{}", verdict, feedback_text(question, classification)),
            }
        }
    }
}

/// Feedback for a classification, falling back to the generic text and then to
/// a list of the correct answers.
fn feedback_text(question: &Question, classification: Classification) -> String {
    let tag = match classification {
        Classification::Correct => FeedbackTag::Correct,
        Classification::PartlyCorrect | Classification::Incorrect => FeedbackTag::Incorrect,
    };

    if let Some(text) = question
        .feedback_for(tag)
        .or_else(|| question.feedback_for(FeedbackTag::Generic))
    {
        return text.to_string();
    }

    let mut out = String::from("The correct answer is:\n");
    for answer in question.answers.iter().filter(|a| a.is_correct) {
        out.push_str(&format!("{}) {}\n", answer.ident, answer.text));
    }
    out
}
