//! Error taxonomy for the referral & ledger core.
//!
//! Every failure carries a stable machine-readable kind (see [`CoreError::kind`])
//! plus a human-readable message (the `Display` impl).

use thiserror::Error;

use crate::storage::StoreError;

/// All errors surfaced by the core operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Could not allocate a unique invite code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },

    #[error("Referrer not found for invite code {0}")]
    ReferrerNotFound(String),

    #[error("A user cannot use their own invite code")]
    SelfReferral,

    #[error("Invite code {0} would create a referral cycle")]
    ReferralCycle(String),

    #[error("Email already registered: {0}")]
    EmailAlreadyRegistered(String),

    #[error("Invalid amount: {0} (must be finite and non-negative)")]
    InvalidAmount(f64),

    #[error("Unknown wallet chain: {0}")]
    UnknownChain(String),

    #[error("Invalid {chain} address: {address}")]
    InvalidAddressFormat { chain: String, address: String },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invite code not found: {0}")]
    InviteNotFound(String),

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Caller does not own this resource")]
    Forbidden,

    #[error("Concurrent modification, retry the request")]
    ConcurrencyConflict,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CoreError {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidIdentity(_) => "InvalidIdentity",
            CoreError::CodeSpaceExhausted { .. } => "CodeSpaceExhausted",
            CoreError::ReferrerNotFound(_) => "ReferrerNotFound",
            CoreError::SelfReferral => "SelfReferral",
            CoreError::ReferralCycle(_) => "ReferralCycle",
            CoreError::EmailAlreadyRegistered(_) => "EmailAlreadyRegistered",
            CoreError::InvalidAmount(_) => "InvalidAmount",
            CoreError::UnknownChain(_) => "UnknownChain",
            CoreError::InvalidAddressFormat { .. } => "InvalidAddressFormat",
            CoreError::UserNotFound(_) => "UserNotFound",
            CoreError::InviteNotFound(_) => "InviteNotFound",
            CoreError::Unauthenticated(_) => "Unauthenticated",
            CoreError::Forbidden => "Forbidden",
            CoreError::ConcurrencyConflict => "ConcurrencyConflict",
            CoreError::StoreUnavailable(_) => "StoreUnavailable",
        }
    }

    /// Only store-level contention is safe to retry blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict)
    }

    /// Validation failures are rejected synchronously and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidIdentity(_)
                | CoreError::InvalidAmount(_)
                | CoreError::UnknownChain(_)
                | CoreError::InvalidAddressFormat { .. }
                | CoreError::SelfReferral
                | CoreError::ReferralCycle(_)
                | CoreError::ReferrerNotFound(_)
        )
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => CoreError::UserNotFound(id),
            StoreError::Conflict => CoreError::ConcurrencyConflict,
            StoreError::Unavailable(msg) => CoreError::StoreUnavailable(msg),
            StoreError::Corrupt(msg) => CoreError::StoreUnavailable(format!("corrupt record: {}", msg)),
            // Uniqueness violations are handled by the callers that can
            // recover from them; anything reaching here is unexpected.
            other @ (StoreError::DuplicateInviteCode(_) | StoreError::DuplicateIdentity(_)) => {
                CoreError::StoreUnavailable(other.to_string())
            }
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(CoreError::SelfReferral.kind(), "SelfReferral");
        assert_eq!(CoreError::InvalidAmount(-1.0).kind(), "InvalidAmount");
        assert_eq!(
            CoreError::EmailAlreadyRegistered("a@example.com".into()).kind(),
            "EmailAlreadyRegistered"
        );
        assert!(!CoreError::EmailAlreadyRegistered("a@example.com".into()).is_validation());
    }

    #[test]
    fn test_store_errors_map_to_core() {
        assert_eq!(CoreError::from(StoreError::Conflict), CoreError::ConcurrencyConflict);
        assert!(CoreError::from(StoreError::Conflict).is_retryable());
        assert_eq!(
            CoreError::from(StoreError::NotFound("u1".into())),
            CoreError::UserNotFound("u1".into())
        );
        assert!(matches!(
            CoreError::from(StoreError::Unavailable("disk".into())),
            CoreError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn test_validation_errors_not_retryable() {
        let err = CoreError::UnknownChain("solana".into());
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }
}
