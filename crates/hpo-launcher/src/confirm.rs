//! Human confirmation before billable submissions.

use hpo_types::{HpoError, HpoResult};
use std::io::{self, BufRead, Write};
use tracing::warn;

/// Asks whether an action may proceed.
pub trait Confirmation: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirmation for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Approves everything. Used for `--yes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirmation for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Prompts on stderr and reads the answer from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePrompt;

impl Confirmation for ConsolePrompt {
    fn confirm(&self, prompt: &str) -> bool {
        let mut stderr = io::stderr().lock();
        if write!(stderr, "{prompt} [y/N] ").and_then(|_| stderr.flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_affirmative(&answer),
            Err(_) => false,
        }
    }
}

/// Only an explicit `y` or `yes` counts as approval.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Fails with [`HpoError::Declined`] unless `confirm` approves `action`.
pub fn require_confirmation(confirm: &dyn Confirmation, action: &str, prompt: &str) -> HpoResult<()> {
    if confirm.confirm(prompt) {
        Ok(())
    } else {
        warn!(action, "confirmation declined, nothing submitted");
        Err(HpoError::Declined {
            action: action.to_string(),
        })
    }
}
