// ============================================================================
// REFERRAL SERVICE - BOUNDARY OPERATIONS
// ============================================================================
//
// One facade over the components, holding the injected store handle:
//
//   register_or_sync       verified identity → UserView
//   register               pre-registration (+ optional referral)
//   get_invite_details     public invite lookup
//   process_referral       owner-only referral link
//   update_wallet_address  owner-only wallet slot update
//   get_user_profile       owner-only profile
//   credit_user            ledger entry point for internal collaborators
//
// Ownership is always derived from the verified subject, never from a
// caller-supplied user id alone.
//
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::identity::{validate_subject, IdentityResolver};
use crate::invite::InviteCodeGenerator;
use crate::ledger::{CreditReceipt, Ledger};
use crate::model::{
    normalize_invite_code, InviteDetails, ProfileHints, User, UserId, UserProfile, UserView,
    WalletAddressesResponse,
};
use crate::referral::{LinkResult, ReferralLinker, ReferralRewards};
use crate::storage::{UserLookup, UserStore};
use crate::wallet::WalletAddressManager;

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralResponse {
    pub linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub referred_by_code: Option<String>,
}

impl ReferralResponse {
    fn from_link(result: LinkResult) -> Self {
        match result {
            LinkResult::Linked { referrer_code, .. } => Self {
                linked: true,
                reason: None,
                referred_by_code: Some(referrer_code),
            },
            LinkResult::AlreadyReferred { existing_code } => Self {
                linked: false,
                reason: Some("AlreadyReferred".into()),
                referred_by_code: Some(existing_code),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user: UserView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral: Option<ReferralResponse>,
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Clone)]
pub struct ReferralService {
    store: Arc<dyn UserStore>,
    resolver: IdentityResolver,
    linker: ReferralLinker,
    ledger: Ledger,
    wallets: WalletAddressManager,
}

impl ReferralService {
    pub fn new(
        store: Arc<dyn UserStore>,
        generator: InviteCodeGenerator,
        rewards: ReferralRewards,
    ) -> CoreResult<Self> {
        Ok(Self {
            resolver: IdentityResolver::new(store.clone(), generator),
            linker: ReferralLinker::new(store.clone(), rewards)?,
            ledger: Ledger::new(store.clone()),
            wallets: WalletAddressManager::new(store.clone()),
            store,
        })
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// `verified_email` comes from the identity provider and may adopt a
    /// pre-registered record; `hints` only update the caller's own profile.
    pub fn register_or_sync(
        &self,
        subject: &str,
        verified_email: Option<&str>,
        hints: &ProfileHints,
    ) -> CoreResult<UserView> {
        let user = self.resolver.resolve_or_create(subject, verified_email, hints)?;
        Ok(UserView::from(&user))
    }

    /// Pre-register a user. A referral failure is reported in the response
    /// and does not undo the registration. A referral is only ever linked
    /// onto the record created by this call.
    pub fn register(&self, hints: &ProfileHints, referral_code: Option<&str>) -> CoreResult<RegisterResponse> {
        let mut user = self.resolver.register(hints)?;

        let referral = match referral_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(match self.linker.link_referral(&user.id, code) {
                Ok(result) => {
                    user = self.store.get(&user.id)?;
                    ReferralResponse::from_link(result)
                }
                Err(e) if e.is_validation() => {
                    warn!(user_id = %user.id, code = %code, error = %e, "Referral at registration rejected");
                    ReferralResponse {
                        linked: false,
                        reason: Some(e.kind().to_string()),
                        referred_by_code: user.referred_by_code.clone(),
                    }
                }
                Err(e) => return Err(e),
            }),
            None => None,
        };

        Ok(RegisterResponse {
            user: UserView::from(&user),
            referral,
        })
    }

    pub fn get_invite_details(&self, invite_code: &str) -> CoreResult<InviteDetails> {
        let code = normalize_invite_code(invite_code);
        let owner = self
            .store
            .find_one(&UserLookup::ByInviteCode(code.clone()))?
            .ok_or_else(|| CoreError::InviteNotFound(code.clone()))?;
        Ok(InviteDetails {
            invite_code: owner.invite_code,
            owner_display_name: owner.display_name,
        })
    }

    pub fn process_referral(
        &self,
        caller_subject: &str,
        user_id: Option<&UserId>,
        referrer_invite_code: &str,
    ) -> CoreResult<ReferralResponse> {
        let user = self.owned_user(caller_subject, user_id)?;
        let result = self.linker.link_referral(&user.id, referrer_invite_code)?;
        Ok(ReferralResponse::from_link(result))
    }

    pub fn update_wallet_address(
        &self,
        caller_subject: &str,
        user_id: Option<&UserId>,
        chain: &str,
        address: &str,
    ) -> CoreResult<WalletAddressesResponse> {
        let user = self.owned_user(caller_subject, user_id)?;
        let user = self.wallets.set_wallet_address(&user.id, chain, address)?;
        Ok(WalletAddressesResponse {
            wallet_addresses: user.wallet_addresses.to_projection(),
        })
    }

    pub fn get_user_profile(&self, caller_subject: &str, user_id: Option<&UserId>) -> CoreResult<UserProfile> {
        let user = self.owned_user(caller_subject, user_id)?;
        Ok(UserProfile::from(&user))
    }

    /// Credit a user. With a `request_id` the credit is applied at most once.
    pub fn credit_user(
        &self,
        user_id: &UserId,
        amount: f64,
        reason: &str,
        request_id: Option<&str>,
    ) -> CoreResult<CreditReceipt> {
        match request_id {
            Some(request_id) => self.ledger.credit_once(user_id, amount, reason, request_id),
            None => {
                let new_balance = self.ledger.credit(user_id, amount, reason)?;
                Ok(CreditReceipt { new_balance, applied: true })
            }
        }
    }

    /// The caller's own record. A `user_id` naming anyone else is `Forbidden`.
    fn owned_user(&self, caller_subject: &str, user_id: Option<&UserId>) -> CoreResult<User> {
        let subject = validate_subject(caller_subject)?;
        let user = self
            .store
            .find_one(&UserLookup::ByIdentitySubject(subject.to_string()))?
            .ok_or_else(|| CoreError::UserNotFound(subject.to_string()))?;
        match user_id {
            Some(id) if *id != user.id => Err(CoreError::Forbidden),
            _ => Ok(user),
        }
    }
}
