//! Repeat-submission cooldown keyed by prompt content.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// How long a prompt hash is remembered after its last accepted submission.
pub const COOLDOWN_RETENTION: Duration = Duration::from_secs(300);

/// Short content hash used as the cooldown key.
pub fn prompt_hash(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Rejects identical prompts submitted within `window` of each other.
#[derive(Debug, Clone)]
pub struct PromptCooldown {
    window: Duration,
    seen: HashMap<String, Instant>,
}

impl PromptCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Record a submission at `now`.
    ///
    /// Returns `false` (and records nothing) if the same prompt was accepted
    /// less than `window` ago.
    pub fn check_and_record(&mut self, prompt: &str, now: Instant) -> bool {
        let key = prompt_hash(prompt);
        if let Some(last) = self.seen.get(&key)
            && now.saturating_duration_since(*last) < self.window
        {
            return false;
        }

        self.seen.insert(key, now);
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < COOLDOWN_RETENTION);
        true
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.seen.len()
    }
}
