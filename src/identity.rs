//! Identity resolution: verified subject → user record.
//!
//! Find-or-create is keyed by the unique `identity_subject` index. Two
//! concurrent first-time resolutions for one subject both try to insert;
//! the loser gets `DuplicateIdentity` from the store and re-reads the
//! winner's record instead of creating a second one.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::invite::{AllocationError, InviteCodeGenerator};
use crate::model::{normalize_email, ProfileHints, User};
use crate::storage::{AttachOutcome, NewUser, StoreError, UserLookup, UserStore};

/// Longest accepted identity subject, in bytes.
pub const MAX_SUBJECT_LEN: usize = 128;

/// First attempt plus one retry after losing a uniqueness race.
const RESOLVE_ATTEMPTS: u32 = 2;

/// Reject empty, oversized, or whitespace/control-laden subjects.
pub fn validate_subject(subject: &str) -> CoreResult<&str> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(CoreError::InvalidIdentity("subject is empty".into()));
    }
    if subject.len() > MAX_SUBJECT_LEN {
        return Err(CoreError::InvalidIdentity(format!(
            "subject exceeds {} bytes",
            MAX_SUBJECT_LEN
        )));
    }
    if subject.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CoreError::InvalidIdentity("subject contains whitespace or control characters".into()));
    }
    Ok(subject)
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
    generator: InviteCodeGenerator,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn UserStore>, generator: InviteCodeGenerator) -> Self {
        Self { store, generator }
    }

    /// Map a verified subject to its user, creating one on first sight.
    ///
    /// Existing records only receive non-destructive hint updates. A
    /// pre-registered user (no subject yet) is adopted only through
    /// `verified_email`, the address vouched for by the identity provider.
    /// The email in `hints` is profile data and never selects a record.
    pub fn resolve_or_create(
        &self,
        subject: &str,
        verified_email: Option<&str>,
        hints: &ProfileHints,
    ) -> CoreResult<User> {
        let subject = validate_subject(subject)?;
        let hints = hints.normalized();
        let verified_email = verified_email.map(normalize_email).filter(|e| !e.is_empty());

        for attempt in 1..=RESOLVE_ATTEMPTS {
            if let Some(user) = self.store.find_one(&UserLookup::ByIdentitySubject(subject.to_string()))? {
                return self.merge(user, &hints);
            }

            if let Some(user) = self.adopt_by_email(subject, verified_email.as_deref())? {
                return self.merge(user, &hints);
            }

            let created = self.generator.create_user(self.store.as_ref(), |invite_code| NewUser {
                identity_subject: Some(subject.to_string()),
                display_name: hints.display_name.clone(),
                email: hints.email.clone().or_else(|| verified_email.clone()),
                invite_code,
            });
            match created {
                Ok(user) => {
                    info!(
                        user_id = %user.id,
                        subject = %subject,
                        invite_code = %user.invite_code,
                        "✅ User created from verified identity"
                    );
                    return Ok(user);
                }
                Err(AllocationError::Store(StoreError::DuplicateIdentity(_))) => {
                    debug!(subject = %subject, attempt, "Lost identity creation race, re-reading");
                }
                Err(other) => return Err(other.into()),
            }
        }

        // Both attempts lost a race; whoever won must be visible by now.
        self.store
            .find_one(&UserLookup::ByIdentitySubject(subject.to_string()))?
            .ok_or(CoreError::ConcurrencyConflict)
    }

    /// Attach `subject` to the single pre-registered user holding `email`.
    fn adopt_by_email(&self, subject: &str, email: Option<&str>) -> CoreResult<Option<User>> {
        let email = match email {
            Some(email) => email,
            None => return Ok(None),
        };
        let mut candidates: Vec<User> = self
            .store
            .find(&UserLookup::ByEmail(email.to_string()))?
            .into_iter()
            .filter(|u| u.identity_subject.is_none())
            .collect();
        if candidates.len() != 1 {
            return Ok(None);
        }
        let candidate = candidates.remove(0);

        match self.store.attach_identity(&candidate.id, subject) {
            Ok(AttachOutcome::Attached(user)) => {
                info!(user_id = %user.id, subject = %subject, "✅ Pre-registered user adopted identity");
                Ok(Some(user))
            }
            // Claimed in the meantime; the caller falls through to creation
            // or re-reads on its next attempt.
            Ok(AttachOutcome::AlreadyBound(user)) if user.identity_subject.as_deref() == Some(subject) => {
                Ok(Some(user))
            }
            Ok(AttachOutcome::AlreadyBound(_)) => Ok(None),
            Err(StoreError::DuplicateIdentity(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn merge(&self, user: User, hints: &ProfileHints) -> CoreResult<User> {
        if hints.display_name.is_none() && hints.email.is_none() {
            return Ok(user);
        }
        Ok(self.store.merge_profile(&user.id, hints)?)
    }

    /// Pre-register a user without an identity subject.
    ///
    /// An email already held by any user is refused; the existing record is
    /// neither returned nor touched.
    pub fn register(&self, hints: &ProfileHints) -> CoreResult<User> {
        let hints = hints.normalized();

        if let Some(email) = &hints.email {
            if !self.store.find(&UserLookup::ByEmail(email.clone()))?.is_empty() {
                warn!("Registration refused: email already registered");
                return Err(CoreError::EmailAlreadyRegistered(email.clone()));
            }
        }

        let user = self
            .generator
            .create_user(self.store.as_ref(), |invite_code| NewUser {
                identity_subject: None,
                display_name: hints.display_name.clone(),
                email: hints.email.clone(),
                invite_code,
            })
            .map_err(CoreError::from)?;
        info!(user_id = %user.id, invite_code = %user.invite_code, "✅ User registered");
        Ok(user)
    }
}
