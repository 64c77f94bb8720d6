use std::io;
use std::sync::Mutex;

use dialoguer::{Confirm, Input};

use waypoint_flows::UserPrompter;

/// Prompts on the terminal with dialoguer.
///
/// A preset answer is used once, before any terminal prompt. Without a
/// terminal, questions after the preset go unanswered so the flow can
/// pause instead of blocking.
pub struct TerminalPrompter {
    preset: Mutex<Option<String>>,
    interactive: bool,
}

impl TerminalPrompter {
    pub fn interactive() -> Self {
        Self {
            preset: Mutex::new(None),
            interactive: true,
        }
    }

    /// Answer the first question with `answer`, then stop answering.
    pub fn answering(answer: String) -> Self {
        Self {
            preset: Mutex::new(Some(answer)),
            interactive: false,
        }
    }

    fn take_preset(&self) -> Option<String> {
        self.preset.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl UserPrompter for TerminalPrompter {
    fn ask(&self, question: &str) -> io::Result<Option<String>> {
        if let Some(answer) = self.take_preset() {
            println!("{}\n> {}", question, answer);
            return Ok(Some(answer));
        }
        if !self.interactive {
            return Ok(None);
        }
        let answer: String = Input::new()
            .with_prompt(question)
            .interact_text()
            .map_err(io::Error::other)?;
        Ok(Some(answer))
    }

    fn confirm(&self, question: &str) -> io::Result<bool> {
        if !self.interactive {
            return Ok(false);
        }
        Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .map_err(io::Error::other)
    }

    fn show(&self, message: &str) {
        println!("{}", message);
    }
}
