//! Referral linking.
//!
//! A user's `referred_by_code` is set at most once, through a single
//! compare-and-set on the "unset" state executed by the store. Of two
//! concurrent attempts exactly one wins; the other observes
//! [`LinkResult::AlreadyReferred`], which is a success signal, so retried
//! requests replay cleanly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::model::{normalize_invite_code, UserId};
use crate::storage::{LinkOutcome, ReferralBonuses, StoreError, UserStore};

/// Compare-and-set attempts before giving up on store contention.
pub const LINK_RETRY_LIMIT: u32 = 3;

/// Bonus amounts credited when a link succeeds. Zero disables a credit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferralRewards {
    pub referrer_bonus: f64,
    pub referee_bonus: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkResult {
    Linked {
        referrer_id: UserId,
        referrer_code: String,
        referrer_bonus: f64,
        referee_bonus: f64,
    },
    AlreadyReferred {
        existing_code: String,
    },
}

impl LinkResult {
    pub fn is_linked(&self) -> bool {
        matches!(self, LinkResult::Linked { .. })
    }
}

#[derive(Clone)]
pub struct ReferralLinker {
    store: Arc<dyn UserStore>,
    rewards: ReferralRewards,
}

impl ReferralLinker {
    /// Fails with `InvalidAmount` if a configured bonus is negative or not finite.
    pub fn new(store: Arc<dyn UserStore>, rewards: ReferralRewards) -> CoreResult<Self> {
        Ledger::validate_amount(rewards.referrer_bonus)?;
        Ledger::validate_amount(rewards.referee_bonus)?;
        Ok(Self { store, rewards })
    }

    pub fn rewards(&self) -> ReferralRewards {
        self.rewards
    }

    /// Attach `user_id` to the owner of `referrer_invite_code`, once.
    pub fn link_referral(&self, user_id: &UserId, referrer_invite_code: &str) -> CoreResult<LinkResult> {
        let code = normalize_invite_code(referrer_invite_code);
        if code.is_empty() {
            return Err(CoreError::ReferrerNotFound(referrer_invite_code.to_string()));
        }

        let bonuses = ReferralBonuses {
            referrer: self.rewards.referrer_bonus,
            referee: self.rewards.referee_bonus,
        };

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.store.set_referrer_if_unset(user_id, &code, bonuses) {
                Ok(outcome) => break outcome,
                Err(StoreError::Conflict) if attempt < LINK_RETRY_LIMIT => {
                    warn!(user_id = %user_id, attempt, "Referral link contended, retrying");
                }
                Err(StoreError::Conflict) => {
                    return Err(CoreError::StoreUnavailable(format!(
                        "referral link still contended after {} attempts",
                        attempt
                    )))
                }
                Err(other) => return Err(other.into()),
            }
        };

        match outcome {
            LinkOutcome::Linked { user, referrer } => {
                info!(
                    user_id = %user.id,
                    referrer_id = %referrer.id,
                    referrer_code = %code,
                    referrer_bonus = bonuses.referrer,
                    referee_bonus = bonuses.referee,
                    "🔗 Referral linked"
                );
                Ok(LinkResult::Linked {
                    referrer_id: referrer.id,
                    referrer_code: code,
                    referrer_bonus: bonuses.referrer,
                    referee_bonus: bonuses.referee,
                })
            }
            LinkOutcome::AlreadyReferred { existing_code, .. } => {
                info!(user_id = %user_id, existing_code = %existing_code, "Referral already set");
                Ok(LinkResult::AlreadyReferred { existing_code })
            }
            LinkOutcome::SelfReferral => Err(CoreError::SelfReferral),
            LinkOutcome::ReferrerMissing => Err(CoreError::ReferrerNotFound(code)),
            LinkOutcome::Cycle => Err(CoreError::ReferralCycle(code)),
        }
    }
}
