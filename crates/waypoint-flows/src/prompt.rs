use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

/// How flows talk to the person running them.
///
/// Calls block; implementations are expected to be quick or interactive.
pub trait UserPrompter: Send + Sync {
    /// Ask a free-text question. `None` means no answer is available now,
    /// and the flow should pause rather than fail.
    fn ask(&self, question: &str) -> io::Result<Option<String>>;

    fn confirm(&self, question: &str) -> io::Result<bool>;

    /// Show a message without expecting a reply.
    fn show(&self, _message: &str) {}
}

/// Replays fixed answers; used by tests and non-interactive runs.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    confirmations: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
    shown: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_confirmations(self, confirmations: impl IntoIterator<Item = bool>) -> Self {
        Self {
            confirmations: Mutex::new(confirmations.into_iter().collect()),
            ..self
        }
    }

    /// Every question asked so far.
    pub fn asked(&self) -> Vec<String> {
        lock(&self.asked).clone()
    }

    /// Every message shown so far.
    pub fn shown(&self) -> Vec<String> {
        lock(&self.shown).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl UserPrompter for ScriptedPrompter {
    fn ask(&self, question: &str) -> io::Result<Option<String>> {
        lock(&self.asked).push(question.to_string());
        Ok(lock(&self.answers).pop_front())
    }

    fn confirm(&self, question: &str) -> io::Result<bool> {
        lock(&self.asked).push(question.to_string());
        // Unscripted confirmations decline
        Ok(lock(&self.confirmations).pop_front().unwrap_or(false))
    }

    fn show(&self, message: &str) {
        lock(&self.shown).push(message.to_string());
    }
}
