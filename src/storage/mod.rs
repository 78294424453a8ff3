// ============================================================================
// USER STORE - PERSISTENCE CONTRACT
// ============================================================================
//
// Every externally visible mutation is ONE call on this trait, and every
// implementation must apply it atomically:
//
//   insert                 unique invite_code + unique identity_subject
//   attach_identity        set identity_subject only if unset
//   merge_profile          non-destructive name/email update
//   set_referrer_if_unset  compare-and-set on referred_by_code (+ bonuses)
//   credit                 atomic increment of balance
//   set_wallet_address     single-slot overwrite
//   delete                 administrative only
//
// Nothing above the store reads a user, mutates it in memory and writes the
// whole document back.
//
// Implementations:
// - RedbUserStore:   ReDB (ACID, single writer) + DashMap read cache
// - MemoryUserStore: parking_lot RwLock over HashMaps (tests, embedding)
//
// ============================================================================

pub mod memory;
pub mod redb_store;

use serde::Serialize;
use thiserror::Error;

use crate::model::{ProfileHints, User, UserId, WalletChain};

pub use memory::MemoryUserStore;
pub use redb_store::RedbUserStore;

/// Upper bound on referral-chain traversal. Longer chains are treated as corrupt.
pub const MAX_REFERRAL_DEPTH: usize = 1024;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Invite code already taken: {0}")]
    DuplicateInviteCode(String),

    #[error("Identity subject already bound to another user: {0}")]
    DuplicateIdentity(String),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Write conflict")]
    Conflict,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn unavailable<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

// ============================================================================
// REQUEST / OUTCOME TYPES
// ============================================================================

/// Closed set of supported lookups. There is no lookup by arbitrary field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    ByInviteCode(String),
    ByEmail(String),
    ByIdentitySubject(String),
    /// Users whose `referred_by_code` equals the given invite code.
    ByReferrer(String),
}

/// Fields fixed at creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub identity_subject: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub invite_code: String,
}

impl NewUser {
    pub fn into_user(self) -> User {
        User {
            id: UserId::generate(),
            identity_subject: self.identity_subject,
            display_name: self.display_name,
            email: self.email,
            invite_code: self.invite_code,
            referred_by_code: None,
            balance: 0.0,
            last_credit_amount: 0.0,
            wallet_addresses: Default::default(),
            created_at: chrono::Utc::now(),
            version: 1,
        }
    }
}

/// Credits applied in the same transaction as a successful referral link.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReferralBonuses {
    pub referrer: f64,
    pub referee: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    Linked { user: User, referrer: User },
    AlreadyReferred { user: User, existing_code: String },
    SelfReferral,
    ReferrerMissing,
    Cycle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
    Attached(User),
    /// The user already carries a (different or identical) subject.
    AlreadyBound(User),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreditOutcome {
    pub user: User,
    /// False when the dedupe key had already been applied.
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_users: u64,
    pub with_identity: u64,
    pub with_referral: u64,
}

// ============================================================================
// TRAIT
// ============================================================================

pub trait UserStore: Send + Sync {
    fn insert(&self, new_user: NewUser) -> StoreResult<User>;

    fn get(&self, id: &UserId) -> StoreResult<User>;

    fn find(&self, lookup: &UserLookup) -> StoreResult<Vec<User>>;

    fn list_all(&self) -> StoreResult<Vec<User>>;

    fn stats(&self) -> StoreResult<StoreStats>;

    fn attach_identity(&self, id: &UserId, subject: &str) -> StoreResult<AttachOutcome>;

    fn merge_profile(&self, id: &UserId, hints: &ProfileHints) -> StoreResult<User>;

    fn set_referrer_if_unset(
        &self,
        id: &UserId,
        referrer_code: &str,
        bonuses: ReferralBonuses,
    ) -> StoreResult<LinkOutcome>;

    fn credit(&self, id: &UserId, amount: f64, dedupe_key: Option<&str>) -> StoreResult<CreditOutcome>;

    fn set_wallet_address(&self, id: &UserId, chain: WalletChain, address: Option<&str>) -> StoreResult<User>;

    fn delete(&self, id: &UserId) -> StoreResult<User>;

    fn find_one(&self, lookup: &UserLookup) -> StoreResult<Option<User>> {
        Ok(self.find(lookup)?.into_iter().next())
    }
}

// ============================================================================
// SHARED MUTATION RULES
// ============================================================================

/// What a link attempt should do, decided inside the store's atomic section.
pub(crate) enum LinkPlan {
    Proceed(User),
    AlreadyReferred(String),
    SelfReferral,
    ReferrerMissing,
    Cycle,
}

/// Decide a link attempt. `by_code` resolves an invite code to its owner
/// using the same transaction/lock the caller will commit under.
pub(crate) fn plan_link<F>(user: &User, referrer_code: &str, mut by_code: F) -> StoreResult<LinkPlan>
where
    F: FnMut(&str) -> StoreResult<Option<User>>,
{
    if let Some(existing) = &user.referred_by_code {
        return Ok(LinkPlan::AlreadyReferred(existing.clone()));
    }
    if referrer_code == user.invite_code {
        return Ok(LinkPlan::SelfReferral);
    }
    let referrer = match by_code(referrer_code)? {
        Some(r) => r,
        None => return Ok(LinkPlan::ReferrerMissing),
    };

    // Follow the referrer's own chain upwards; reaching `user` means a cycle.
    let mut cursor = referrer.referred_by_code.clone();
    let mut hops = 0;
    while let Some(code) = cursor {
        if code == user.invite_code {
            return Ok(LinkPlan::Cycle);
        }
        hops += 1;
        if hops > MAX_REFERRAL_DEPTH {
            return Ok(LinkPlan::Cycle);
        }
        cursor = by_code(&code)?.and_then(|u| u.referred_by_code);
    }

    Ok(LinkPlan::Proceed(referrer))
}

/// Additive credit on an in-transaction copy of the user.
pub(crate) fn apply_credit(user: &mut User, amount: f64) {
    user.balance += amount;
    user.last_credit_amount = amount;
    user.version += 1;
}
