// src/import/qti.rs

//! QTI 1.2 style quiz exports.
//!
//! Each `item` becomes one question; its `title` attribute names the kind.

use roxmltree::{Document, Node};

use crate::{
    error::AppError,
    models::question::{Answer, Feedback, FeedbackTag, Question, QuestionKind},
};

/// Wrap width handed to the HTML renderer; whitespace is collapsed afterwards.
const TEXT_WIDTH: usize = 1000;

/// Questions read from one export.
#[derive(Debug, Clone)]
pub struct ImportedQuiz {
    /// `title` of the `assessment` element, if any.
    pub title: Option<String>,
    pub questions: Vec<Question>,
    /// Items of unsupported kinds or violating the kind rules.
    pub skipped: usize,
}

pub fn parse(source: &str) -> Result<ImportedQuiz, AppError> {
    let doc = Document::parse(source)?;

    let title = doc
        .descendants()
        .find(|n| is(n, "assessment"))
        .and_then(|n| n.attribute("title"))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let mut questions = Vec::new();
    let mut skipped = 0;

    for item in doc.descendants().filter(|n| is(n, "item")) {
        let ident = item.attribute("ident").unwrap_or_default();
        let item_title = item.attribute("title").unwrap_or_default();

        let Some(kind) = QuestionKind::from_qti_title(item_title) else {
            tracing::warn!(ident, title = item_title, "Question type not supported, skipping");
            skipped += 1;
            continue;
        };

        match parse_item(item, ident, kind) {
            Ok(question) => questions.push(question),
            Err(e) => {
                tracing::warn!(ident, error = %e, "Invalid question, skipping");
                skipped += 1;
            }
        }
    }

    if questions.is_empty() {
        return Err(AppError::Validation(
            "The export does not contain any supported question".to_string(),
        ));
    }

    Ok(ImportedQuiz {
        title,
        questions,
        skipped,
    })
}

fn parse_item(item: Node, ident: &str, kind: QuestionKind) -> Result<Question, AppError> {
    let prompt = item
        .descendants()
        .find(|n| is(n, "presentation"))
        .and_then(|p| p.children().find(|n| is(n, "flow")))
        .and_then(|f| f.children().find(|n| is(n, "material")))
        .and_then(|m| m.children().find(|n| is(n, "mattext")))
        .or_else(|| {
            item.descendants()
                .find(|n| is(n, "presentation"))
                .and_then(|p| p.descendants().find(|n| is(n, "mattext")))
        })
        .map(mattext)
        .unwrap_or_default();

    let (answers, feedback) = match kind {
        QuestionKind::Essay => (Vec::new(), model_answer(item).into_iter().collect()),
        _ => (answers(item), item_feedback(item)),
    };

    Question::new(ident, kind, prompt, answers, feedback)
}

fn answers(item: Node) -> Vec<Answer> {
    let conditions: Vec<Node> = item
        .descendants()
        .filter(|n| is(n, "respcondition"))
        .collect();

    let mut answers: Vec<Answer> = item
        .descendants()
        .filter(|n| is(n, "response_label"))
        .filter_map(|label| {
            let ident = label.attribute("ident")?;
            let text = label.descendants().find(|n| is(n, "mattext")).map(mattext)?;
            if text.is_empty() {
                tracing::warn!(ident, "No text found for answer");
                return None;
            }
            let correct = conditions.iter().any(|c| marks_correct(*c, ident));
            Some(Answer::new(choice_suffix(ident), text, correct))
        })
        .collect();

    if answers.iter().any(|a| a.ident.chars().count() != 1) {
        for (i, answer) in answers.iter_mut().enumerate() {
            answer.ident = letter(i);
        }
    }

    answers
}

/// True when `condition` tests for `ident` and links to the Correct feedback.
fn marks_correct(condition: Node, ident: &str) -> bool {
    let tests_ident = condition
        .descendants()
        .filter(|n| is(n, "varequal"))
        .any(|n| n.text().map(str::trim) == Some(ident));

    tests_ident
        && condition
            .descendants()
            .filter(|n| is(n, "displayfeedback"))
            .any(|n| {
                n.attribute("feedbacktype") == Some("Response")
                    && n.attribute("linkrefid") == Some("Correct")
            })
}

fn model_answer(item: Node) -> Option<Feedback> {
    let text = item
        .descendants()
        .find(|n| is(n, "response_label"))
        .and_then(|label| label.descendants().find(|n| is(n, "mattext")))
        .map(mattext)
        .filter(|t| !t.is_empty())?;
    Some(Feedback::new(FeedbackTag::ModelAnswer, text))
}

fn item_feedback(item: Node) -> Vec<Feedback> {
    item.descendants()
        .filter(|n| is(n, "itemfeedback"))
        .filter_map(|fb| {
            let tag = match fb.attribute("ident")? {
                "Correct" => FeedbackTag::Correct,
                "InCorrect" | "Incorrect" => FeedbackTag::Incorrect,
                "general_fb" | "Generic" => FeedbackTag::Generic,
                _ => return None,
            };
            let text = fb.descendants().find(|n| is(n, "mattext")).map(mattext)?;
            (!text.is_empty()).then(|| Feedback::new(tag, text))
        })
        .collect()
}

fn is(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// Text of a `mattext`. HTML content is rendered to plain text.
fn mattext(node: Node) -> String {
    let text = node.text().unwrap_or_default().trim();
    if node.attribute("texttype") != Some("text/html") {
        return text.to_string();
    }
    let plain = match html2text::from_read(text.as_bytes(), TEXT_WIDTH) {
        Ok(plain) => plain,
        Err(e) => {
            tracing::warn!(error = %e, "HTML to text conversion failed, keeping markup");
            text.to_string()
        }
    };
    plain.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `CHOICE_B` -> `B`.
fn choice_suffix(ident: &str) -> String {
    match ident.strip_prefix("CHOICE_") {
        Some(suffix) if suffix.chars().count() == 1 => suffix.to_string(),
        _ => ident.to_string(),
    }
}

/// A, B, ..., Z, AA, AB, ...
fn letter(index: usize) -> String {
    let mut n = index;
    let mut out = Vec::new();
    loop {
        out.push((b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.iter().rev().collect()
}
