use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::EntityId;
use crate::error::KiraError;
use crate::query::{LabelQuery, QueryError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", content = "entities", rename_all = "kebab-case")]
pub enum ResolutionDisposition {
    NotFound,
    Unique(EntityId),
    Ambiguous(Vec<EntityId>),
}

impl ResolutionDisposition {
    pub fn from_matches(mut matches: Vec<EntityId>) -> Self {
        matches.sort();
        matches.dedup();
        match matches.len() {
            0 => ResolutionDisposition::NotFound,
            1 => ResolutionDisposition::Unique(matches.remove(0)),
            _ => ResolutionDisposition::Ambiguous(matches),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

pub struct EntityResolver<'a, Q: LabelQuery + ?Sized> {
    query: &'a Q,
    language: &'a str,
    policy: RetryPolicy,
}

impl<'a, Q: LabelQuery + ?Sized> EntityResolver<'a, Q> {
    pub fn new(query: &'a Q, language: &'a str, policy: RetryPolicy) -> Self {
        Self {
            query,
            language,
            policy,
        }
    }

    pub fn resolve(&self, label: &str) -> Result<ResolutionDisposition, KiraError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match self.query.find_by_label(label, self.language) {
                Ok(matches) => {
                    let disposition = ResolutionDisposition::from_matches(matches);
                    debug!(label = %label, ?disposition, "label resolved");
                    return Ok(disposition);
                }
                Err(QueryError::Malformed(message)) => {
                    return Err(KiraError::ResolutionMalformedResponse {
                        label: label.to_string(),
                        message,
                    });
                }
                Err(QueryError::Transport(message)) => {
                    if attempt >= max_attempts {
                        return Err(KiraError::ResolutionTransportFailure {
                            label: label.to_string(),
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        label = %label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "label lookup failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
