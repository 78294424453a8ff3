//! In-process `UserStore`.
//!
//! One `RwLock` guards every map, so each trait call is a single critical
//! section and therefore atomic with respect to every other call.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::{
    apply_credit, plan_link, AttachOutcome, CreditOutcome, LinkOutcome, LinkPlan, NewUser,
    ReferralBonuses, StoreError, StoreResult, StoreStats, UserLookup, UserStore,
};
use crate::model::{normalize_email, normalize_invite_code, ProfileHints, User, UserId, WalletChain};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    by_invite_code: HashMap<String, UserId>,
    by_subject: HashMap<String, UserId>,
    applied_credits: HashSet<(UserId, String)>,
}

impl Inner {
    fn user_mut(&mut self, id: &UserId) -> StoreResult<&mut User> {
        self.users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn by_code(&self, code: &str) -> Option<User> {
        self.by_invite_code
            .get(code)
            .and_then(|id| self.users.get(id))
            .cloned()
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryUserStore {
    fn insert(&self, new_user: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.write();
        if inner.by_invite_code.contains_key(&new_user.invite_code) {
            return Err(StoreError::DuplicateInviteCode(new_user.invite_code));
        }
        if let Some(subject) = &new_user.identity_subject {
            if inner.by_subject.contains_key(subject) {
                return Err(StoreError::DuplicateIdentity(subject.clone()));
            }
        }

        let user = new_user.into_user();
        inner.by_invite_code.insert(user.invite_code.clone(), user.id.clone());
        if let Some(subject) = &user.identity_subject {
            inner.by_subject.insert(subject.clone(), user.id.clone());
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    fn get(&self, id: &UserId) -> StoreResult<User> {
        self.inner
            .read()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn find(&self, lookup: &UserLookup) -> StoreResult<Vec<User>> {
        let inner = self.inner.read();
        let found = match lookup {
            UserLookup::ByInviteCode(code) => {
                inner.by_code(&normalize_invite_code(code)).into_iter().collect()
            }
            UserLookup::ByIdentitySubject(subject) => inner
                .by_subject
                .get(subject)
                .and_then(|id| inner.users.get(id))
                .cloned()
                .into_iter()
                .collect(),
            UserLookup::ByEmail(email) => {
                let email = normalize_email(email);
                inner
                    .users
                    .values()
                    .filter(|u| u.email.as_deref() == Some(email.as_str()))
                    .cloned()
                    .collect()
            }
            UserLookup::ByReferrer(code) => {
                let code = normalize_invite_code(code);
                inner
                    .users
                    .values()
                    .filter(|u| u.referred_by_code.as_deref() == Some(code.as_str()))
                    .cloned()
                    .collect()
            }
        };
        Ok(found)
    }

    fn list_all(&self) -> StoreResult<Vec<User>> {
        Ok(self.inner.read().users.values().cloned().collect())
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let inner = self.inner.read();
        Ok(StoreStats {
            total_users: inner.users.len() as u64,
            with_identity: inner.users.values().filter(|u| u.identity_subject.is_some()).count() as u64,
            with_referral: inner.users.values().filter(|u| u.referred_by_code.is_some()).count() as u64,
        })
    }

    fn attach_identity(&self, id: &UserId, subject: &str) -> StoreResult<AttachOutcome> {
        let mut inner = self.inner.write();
        if let Some(owner) = inner.by_subject.get(subject) {
            if owner != id {
                return Err(StoreError::DuplicateIdentity(subject.to_string()));
            }
        }
        let user = inner.user_mut(id)?;
        if user.identity_subject.is_some() {
            return Ok(AttachOutcome::AlreadyBound(user.clone()));
        }
        user.identity_subject = Some(subject.to_string());
        user.version += 1;
        let user = user.clone();
        inner.by_subject.insert(subject.to_string(), id.clone());
        Ok(AttachOutcome::Attached(user))
    }

    fn merge_profile(&self, id: &UserId, hints: &ProfileHints) -> StoreResult<User> {
        let mut inner = self.inner.write();
        let user = inner.user_mut(id)?;
        if hints.apply_to(user) {
            user.version += 1;
        }
        Ok(user.clone())
    }

    fn set_referrer_if_unset(
        &self,
        id: &UserId,
        referrer_code: &str,
        bonuses: ReferralBonuses,
    ) -> StoreResult<LinkOutcome> {
        let mut inner = self.inner.write();
        let user = inner
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let referrer = match plan_link(&user, referrer_code, |code| Ok(inner.by_code(code)))? {
            LinkPlan::Proceed(referrer) => referrer,
            LinkPlan::AlreadyReferred(existing_code) => {
                return Ok(LinkOutcome::AlreadyReferred { user, existing_code })
            }
            LinkPlan::SelfReferral => return Ok(LinkOutcome::SelfReferral),
            LinkPlan::ReferrerMissing => return Ok(LinkOutcome::ReferrerMissing),
            LinkPlan::Cycle => return Ok(LinkOutcome::Cycle),
        };

        let user = {
            let user = inner.user_mut(id)?;
            user.referred_by_code = Some(referrer_code.to_string());
            user.version += 1;
            if bonuses.referee > 0.0 {
                apply_credit(user, bonuses.referee);
            }
            user.clone()
        };
        let referrer = {
            let referrer = inner.user_mut(&referrer.id)?;
            if bonuses.referrer > 0.0 {
                apply_credit(referrer, bonuses.referrer);
            }
            referrer.clone()
        };
        Ok(LinkOutcome::Linked { user, referrer })
    }

    fn credit(&self, id: &UserId, amount: f64, dedupe_key: Option<&str>) -> StoreResult<CreditOutcome> {
        let mut inner = self.inner.write();
        if let Some(key) = dedupe_key {
            let marker = (id.clone(), key.to_string());
            if inner.applied_credits.contains(&marker) {
                let user = inner.user_mut(id)?.clone();
                return Ok(CreditOutcome { user, applied: false });
            }
            // Only record the key once the user is known to exist.
            inner.user_mut(id)?;
            inner.applied_credits.insert(marker);
        }
        let user = inner.user_mut(id)?;
        apply_credit(user, amount);
        Ok(CreditOutcome { user: user.clone(), applied: true })
    }

    fn set_wallet_address(&self, id: &UserId, chain: WalletChain, address: Option<&str>) -> StoreResult<User> {
        let mut inner = self.inner.write();
        let user = inner.user_mut(id)?;
        if user.wallet_addresses.get(chain) != address {
            user.wallet_addresses.set(chain, address.map(str::to_string));
            user.version += 1;
        }
        Ok(user.clone())
    }

    fn delete(&self, id: &UserId) -> StoreResult<User> {
        let mut inner = self.inner.write();
        let user = inner
            .users
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        // The invite code stays reserved: codes are never reissued.
        if let Some(subject) = &user.identity_subject {
            inner.by_subject.remove(subject);
        }
        inner.applied_credits.retain(|(owner, _)| owner != id);
        Ok(user)
    }
}
