// src/services/dispatcher.rs

use crate::{
    error::AppError,
    models::{progress::NextQuestion, quiz::Quiz},
    services::{
        catalog::{Catalog, QUIZ_NOT_FOUND},
        progress::{ProgressTracker, completion_message, out_of_range},
    },
};

pub const GREETING: &str =
    "Hello! I am the quiz bot. Type 'quizzes' to see what you can learn or 'help' for all commands.";

pub const HELP_TEXT: &str = "I understand these commands:\n\
hello - say hello\n\
help - show this list\n\
quizzes - list all quizzes\n\
subscribe <quiz> (sub) - subscribe to a quiz\n\
unsubscribe <quiz> (unsub) - unsubscribe from a quiz\n\
subscribed - list your subscriptions\n\
nextquestion [quiz] (nq) - get the next question now\n\
reset <quiz> - start a quiz over\n\
messages <quiz> <0-10> - questions per day you want to receive\n\
delete <quiz> - delete a quiz (administrators only)\n\
When you have an open question, just type your answer, e.g. 'b' or 'a and c'.";

pub const NOT_UNDERSTOOD: &str =
    "Sorry, I didn't understand that. Type 'help' to see the available commands.";

/// Chat commands and their aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Hello,
    Help,
    Quizzes,
    Subscribe,
    Unsubscribe,
    Subscribed,
    NextQuestion,
    Delete,
    Reset,
    Messages,
}

impl Command {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "hello" | "hi" | "hey" => Some(Command::Hello),
            "help" => Some(Command::Help),
            "quizzes" => Some(Command::Quizzes),
            "subscribe" | "sub" => Some(Command::Subscribe),
            "unsubscribe" | "unsub" => Some(Command::Unsubscribe),
            "subscribed" => Some(Command::Subscribed),
            "nextquestion" | "nq" => Some(Command::NextQuestion),
            "delete" => Some(Command::Delete),
            "reset" => Some(Command::Reset),
            "messages" => Some(Command::Messages),
            _ => None,
        }
    }

    fn usage(&self) -> &'static str {
        match self {
            Command::Subscribe => "Please tell me which quiz, e.g. 'subscribe math'.",
            Command::Unsubscribe => "Please tell me which quiz, e.g. 'unsubscribe math'.",
            Command::Delete => "Please tell me which quiz, e.g. 'delete math'.",
            Command::Reset => "Please tell me which quiz, e.g. 'reset math'.",
            Command::Messages => {
                "Please tell me the quiz and a number, e.g. 'messages math 3'."
            }
            _ => HELP_TEXT,
        }
    }
}

/// Splits a message into its lower-cased command and the parameter.
///
/// The parameter keeps the original casing and is trimmed.
pub fn parse(raw: &str) -> Option<(Command, &str)> {
    let trimmed = raw.trim();
    let first = trimmed.split_whitespace().next()?;
    let command = Command::from_token(&first.to_lowercase())?;
    Some((command, trimmed[first.len()..].trim()))
}

/// Splits `"<quiz> <n>"` into the quiz reference and the quota.
pub fn parse_quota(parameter: &str) -> Result<(&str, i64), AppError> {
    let Some((quiz, raw)) = parameter.trim().rsplit_once(char::is_whitespace) else {
        return Err(AppError::Validation(Command::Messages.usage().to_string()));
    };
    let quiz = quiz.trim();
    if quiz.is_empty() {
        return Err(AppError::Validation(Command::Messages.usage().to_string()));
    }
    let quota = raw.parse::<i64>().map_err(|_| out_of_range(raw))?;
    Ok((quiz, quota))
}

/// Routes chat messages to catalog and progress operations.
#[derive(Clone)]
pub struct Dispatcher {
    catalog: Catalog,
    progress: ProgressTracker,
    chat_admins: Vec<String>,
}

impl Dispatcher {
    pub fn new(catalog: Catalog, progress: ProgressTracker, chat_admins: Vec<String>) -> Self {
        Self {
            catalog,
            progress,
            chat_admins,
        }
    }

    /// Handles one inbound message and returns the reply. Never fails.
    pub async fn handle(&self, raw: &str, room: &str, learner: &str) -> String {
        let result = match parse(raw) {
            Some((command, parameter)) => self.run(command, parameter, room, learner).await,
            None => self.answer_or_fallback(raw, room, learner).await,
        };

        match result {
            Ok(reply) => reply,
            Err(err) => {
                tracing::debug!(learner, room, error = %err, "Command rejected");
                err.chat_reply()
            }
        }
    }

    async fn run(
        &self,
        command: Command,
        parameter: &str,
        room: &str,
        learner: &str,
    ) -> Result<String, AppError> {
        let needs_quiz = matches!(
            command,
            Command::Subscribe
                | Command::Unsubscribe
                | Command::Delete
                | Command::Reset
                | Command::Messages
        );
        if needs_quiz && parameter.is_empty() {
            return Ok(command.usage().to_string());
        }

        match command {
            Command::Hello => Ok(GREETING.to_string()),
            Command::Help => Ok(HELP_TEXT.to_string()),
            Command::Quizzes => self.list_quizzes().await,
            Command::Subscribe => {
                let quiz = self.catalog.lookup(parameter).await?;
                self.progress.subscribe(learner, &quiz, room).await?;
                Ok(format!(
                    "You are now subscribed to {}. Type 'nq {}' to get your first question.",
                    quiz.name, quiz.alias
                ))
            }
            Command::Unsubscribe => {
                let quiz = self.catalog.lookup(parameter).await?;
                self.progress.unsubscribe(learner, &quiz).await?;
                Ok(format!("You are no longer subscribed to {}.", quiz.name))
            }
            Command::Subscribed => self.list_subscriptions(learner).await,
            Command::NextQuestion => {
                let quiz = self.resolve_next_question_quiz(parameter, learner).await?;
                match self.progress.next_question(learner, &quiz, room).await? {
                    NextQuestion::Delivered(question) => Ok(question.render()),
                    NextQuestion::Completed { quiz_name } => Ok(completion_message(&quiz_name)),
                }
            }
            Command::Delete => {
                if !self.chat_admins.iter().any(|admin| admin == learner) {
                    return Err(AppError::Forbidden(
                        "Only administrators can delete quizzes.".to_string(),
                    ));
                }
                let quiz = self.catalog.lookup(parameter).await?;
                self.catalog.delete(quiz.id).await?;
                tracing::info!(learner, quiz_id = quiz.id, "Quiz deleted over chat");
                Ok(format!("Quiz {} has been deleted.", quiz.name))
            }
            Command::Reset => {
                let quiz = self.catalog.lookup(parameter).await?;
                self.progress.reset(learner, &quiz).await?;
                Ok(format!(
                    "Your progress in {} has been reset. Type 'nq {}' to start again.",
                    quiz.name, quiz.alias
                ))
            }
            Command::Messages => {
                let (reference, quota) = parse_quota(parameter)?;
                let quiz = self.catalog.lookup(reference).await?;
                self.progress.set_quota(learner, &quiz, quota).await?;
                Ok(format!(
                    "You will now receive up to {} question(s) per day from {}.",
                    quota, quiz.name
                ))
            }
        }
    }

    /// Free text is an answer when a question is open in this room.
    async fn answer_or_fallback(
        &self,
        raw: &str,
        room: &str,
        learner: &str,
    ) -> Result<String, AppError> {
        if self.progress.open_question(learner, room).await?.is_none() {
            return Ok(NOT_UNDERSTOOD.to_string());
        }
        self.progress.submit_answer(learner, room, raw.trim()).await
    }

    /// Without a parameter the single active subscription is used.
    async fn resolve_next_question_quiz(
        &self,
        parameter: &str,
        learner: &str,
    ) -> Result<Quiz, AppError> {
        if !parameter.is_empty() {
            return self.catalog.lookup(parameter).await;
        }

        let subscribed = self.progress.quizzes_subscribed(learner).await?;
        match subscribed.as_slice() {
            [] => Err(AppError::NotFound(QUIZ_NOT_FOUND.to_string())),
            [only] => self.catalog.get(only.quiz_id).await,
            _ => Err(AppError::Validation(
                "You are subscribed to more than one quiz. Please tell me which one, e.g. 'nq math'."
                    .to_string(),
            )),
        }
    }

    async fn list_quizzes(&self) -> Result<String, AppError> {
        let quizzes = self.catalog.list().await?;
        if quizzes.is_empty() {
            return Ok("There are no quizzes yet.".to_string());
        }

        let mut out = String::from("Available quizzes:\n");
        for quiz in quizzes {
            out.push_str(&format!(
                "{}) {} ({} questions)\n",
                quiz.alias, quiz.name, quiz.question_count
            ));
        }
        Ok(out)
    }

    async fn list_subscriptions(&self, learner: &str) -> Result<String, AppError> {
        let subscribed = self.progress.quizzes_subscribed(learner).await?;
        if subscribed.is_empty() {
            return Ok("You are not subscribed to any quiz.".to_string());
        }

        let mut out = String::from("You are subscribed to:\n");
        for quiz in subscribed {
            out.push_str(&format!(
                "{}) {} ({} per day)\n",
                quiz.alias, quiz.name, quiz.daily_quota
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_parameter_case() {
        assert_eq!(parse("Subscribe  My Quiz "), Some((Command::Subscribe, "My Quiz")));
        assert_eq!(parse("NQ"), Some((Command::NextQuestion, "")));
        assert_eq!(parse("hey there"), Some((Command::Hello, "there")));
    }

    #[test]
    fn parse_rejects_unknown_and_empty() {
        assert_eq!(parse("b"), None);
        assert_eq!(parse("   "), None);
        assert_eq!(parse("subscribemath"), None);
    }

    #[test]
    fn quota_parameter_takes_trailing_integer() {
        assert_eq!(parse_quota("math 5").unwrap(), ("math", 5));
        assert_eq!(parse_quota("World History  3").unwrap(), ("World History", 3));
    }

    #[test]
    fn quota_parameter_rejects_non_numbers() {
        let err = parse_quota("math lots").unwrap_err();
        assert!(err.chat_reply().contains("'lots' is not a valid number"));
        assert!(parse_quota("math").is_err());
    }
}
