//! Short code generation.
//!
//! Short codes are 6-character aliases over `A-Z0-9` that organizers share
//! with their audience. The unique index on `poll.short_code` is the source
//! of truth; the existence check here only avoids most retries.

use std::sync::Arc;

use livepoll_common::{AppError, AppResult};
use livepoll_db::repositories::PollRepository;
use rand::Rng;
use tracing::debug;

/// Symbols a short code is drawn from.
pub const SHORT_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a short code.
pub const SHORT_CODE_LENGTH: usize = 6;

/// Default bound on generation attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 32;

type CodeSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Generates short codes not yet used by any poll.
#[derive(Clone)]
pub struct ShortCodeGenerator {
    poll_repo: PollRepository,
    max_attempts: u32,
    source: CodeSource,
}

impl ShortCodeGenerator {
    /// Create a new generator drawing codes with [`random_code`].
    #[must_use]
    pub fn new(poll_repo: PollRepository) -> Self {
        Self {
            poll_repo,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            source: Arc::new(random_code),
        }
    }

    /// Draw candidate codes from `source` instead.
    #[must_use]
    pub fn with_source(mut self, source: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.source = Arc::new(source);
        self
    }

    /// Override the attempt bound.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Attempt bound used by [`Self::generate`].
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Generate a code that no stored poll uses.
    ///
    /// Returns [`AppError::Conflict`] when every attempt collided.
    pub async fn generate(&self) -> AppResult<String> {
        for attempt in 1..=self.max_attempts {
            let code = (self.source)();
            if !self.poll_repo.short_code_exists(&code).await? {
                return Ok(code);
            }
            debug!(attempt, "Short code collision, regenerating");
        }

        Err(AppError::Conflict(format!(
            "no free short code after {} attempts",
            self.max_attempts
        )))
    }
}

/// Draw a random short code without checking the store.
#[must_use]
pub fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SHORT_CODE_LENGTH)
        .map(|_| char::from(SHORT_CODE_ALPHABET[rng.gen_range(0..SHORT_CODE_ALPHABET.len())]))
        .collect()
}

/// Canonical form of user-entered codes.
#[must_use]
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
