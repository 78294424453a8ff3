//! Invite code generation.
//!
//! Codes are drawn from an alphabet without visually confusable characters
//! (no `0/O`, `1/I/L`). Uniqueness is not assumed: the candidate is offered
//! to the store together with the new user, and a uniqueness violation
//! triggers a fresh candidate, up to a fixed number of attempts.

use std::sync::Arc;

use rand::Rng;
use tracing::warn;

use crate::error::CoreError;
use crate::model::User;
use crate::storage::{NewUser, StoreError, UserStore};

/// Unambiguous upper-case alphanumerics.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Source of candidate codes. Swappable so tests can script collisions.
pub trait CodeSource: Send + Sync {
    fn next_code(&self, length: usize) -> String;
}

/// Thread-local RNG over [`CODE_ALPHABET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeSource;

impl CodeSource for RandomCodeSource {
    fn next_code(&self, length: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

#[derive(Clone)]
pub struct InviteCodeGenerator {
    source: Arc<dyn CodeSource>,
    length: usize,
    max_attempts: u32,
}

impl Default for InviteCodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH, DEFAULT_MAX_ATTEMPTS)
    }
}

impl InviteCodeGenerator {
    pub fn new(length: usize, max_attempts: u32) -> Self {
        Self::with_source(Arc::new(RandomCodeSource), length, max_attempts)
    }

    pub fn with_source(source: Arc<dyn CodeSource>, length: usize, max_attempts: u32) -> Self {
        Self {
            source,
            length,
            max_attempts: max_attempts.max(1),
        }
    }

    /// A fresh candidate. Not guaranteed unique on its own.
    pub fn generate(&self) -> String {
        self.source.next_code(self.length)
    }

    /// Persist a new user under a freshly generated, globally unique code.
    ///
    /// `build` receives each candidate and returns the record to insert.
    /// Code collisions and write conflicts are counted separately, each up
    /// to `max_attempts`. Identity conflicts and other store errors are
    /// returned untouched so the caller can decide how to recover.
    pub fn create_user<F>(&self, store: &dyn UserStore, build: F) -> Result<User, AllocationError>
    where
        F: Fn(String) -> NewUser,
    {
        let mut collisions = 0u32;
        let mut conflicts = 0u32;
        loop {
            let candidate = self.generate();
            match store.insert(build(candidate.clone())) {
                Ok(user) => return Ok(user),
                Err(StoreError::DuplicateInviteCode(_)) => {
                    collisions += 1;
                    if collisions >= self.max_attempts {
                        return Err(AllocationError::Exhausted { attempts: collisions });
                    }
                    warn!(attempt = collisions, candidate = %candidate, "Invite code collision, regenerating");
                }
                Err(StoreError::Conflict) => {
                    conflicts += 1;
                    if conflicts >= self.max_attempts {
                        return Err(AllocationError::Contended { attempts: conflicts });
                    }
                    warn!(attempt = conflicts, "User insert contended, retrying");
                }
                Err(other) => return Err(AllocationError::Store(other)),
            }
        }
    }
}

/// Outcome of a failed allocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationError {
    /// Every candidate collided with an existing code.
    Exhausted { attempts: u32 },
    /// The store kept reporting write conflicts.
    Contended { attempts: u32 },
    Store(StoreError),
}

impl From<AllocationError> for CoreError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::Exhausted { attempts } => CoreError::CodeSpaceExhausted { attempts },
            AllocationError::Contended { attempts } => {
                CoreError::StoreUnavailable(format!("user insert still contended after {} attempts", attempts))
            }
            AllocationError::Store(e) => e.into(),
        }
    }
}
