//! User record, wallet chains and the projections handed to callers.
//!
//! The persisted `User` is never returned across the boundary directly;
//! callers get one of the projection types at the bottom of this file.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Internally generated user identifier (UUIDv4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn generate() -> Self {
        UserId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form of an invite code: trimmed, upper-case.
pub fn normalize_invite_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Canonical form of an email address: trimmed, lower-case.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

// ============================================================================
// WALLET CHAINS
// ============================================================================

/// Supported withdrawal chains. All current chains are EVM-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WalletChain {
    #[serde(rename = "metamask")]
    Metamask,
    #[serde(rename = "trustWallet")]
    TrustWallet,
}

impl WalletChain {
    pub const ALL: [WalletChain; 2] = [WalletChain::Metamask, WalletChain::TrustWallet];

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletChain::Metamask => "metamask",
            WalletChain::TrustWallet => "trustWallet",
        }
    }
}

impl fmt::Display for WalletChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletChain {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WalletChain::ALL
            .iter()
            .copied()
            .find(|chain| chain.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownChain(s.to_string()))
    }
}

/// Chain → address slots. Cleared slots are absent from the map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddresses(BTreeMap<String, String>);

impl WalletAddresses {
    pub fn get(&self, chain: WalletChain) -> Option<&str> {
        self.0.get(chain.as_str()).map(String::as_str)
    }

    /// `None` clears the slot.
    pub fn set(&mut self, chain: WalletChain, address: Option<String>) {
        match address {
            Some(addr) => {
                self.0.insert(chain.as_str().to_string(), addr);
            }
            None => {
                self.0.remove(chain.as_str());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every known chain, with `""` for unset slots.
    pub fn to_projection(&self) -> BTreeMap<String, String> {
        WalletChain::ALL
            .iter()
            .map(|chain| {
                (
                    chain.as_str().to_string(),
                    self.get(*chain).unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

// ============================================================================
// USER
// ============================================================================

/// Persisted user document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub identity_subject: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub invite_code: String,
    pub referred_by_code: Option<String>,
    pub balance: f64,
    pub last_credit_amount: f64,
    #[serde(default)]
    pub wallet_addresses: WalletAddresses,
    pub created_at: DateTime<Utc>,
    /// Bumped on every committed mutation.
    #[serde(default)]
    pub version: u64,
}

/// Optional name/email hints supplied at registration or sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileHints {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl ProfileHints {
    pub fn new(display_name: Option<&str>, email: Option<&str>) -> Self {
        Self {
            display_name: display_name.map(str::to_string),
            email: email.map(str::to_string),
        }
    }

    /// Trim values, drop empty ones and canonicalise the email.
    pub fn normalized(&self) -> Self {
        let display_name = self
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let email = self
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|s| !s.is_empty());
        Self { display_name, email }
    }

    /// Apply the hints to a user without erasing anything already set.
    /// Returns true when a field changed.
    pub fn apply_to(&self, user: &mut User) -> bool {
        let hints = self.normalized();
        let mut changed = false;
        if let Some(name) = hints.display_name {
            if user.display_name.as_deref() != Some(name.as_str()) {
                user.display_name = Some(name);
                changed = true;
            }
        }
        if let Some(email) = hints.email {
            if user.email.as_deref() != Some(email.as_str()) {
                user.email = Some(email);
                changed = true;
            }
        }
        changed
    }
}

// ============================================================================
// PROJECTIONS
// ============================================================================

/// Returned by register / sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub invite_code: String,
    pub referred_by_code: Option<String>,
    pub balance: f64,
    pub wallet_addresses: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            invite_code: user.invite_code.clone(),
            referred_by_code: user.referred_by_code.clone(),
            balance: user.balance,
            wallet_addresses: user.wallet_addresses.to_projection(),
            created_at: user.created_at,
        }
    }
}

/// Public invite lookup. Carries nothing beyond the code and owner name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteDetails {
    pub invite_code: String,
    pub owner_display_name: Option<String>,
}

/// Owner-only profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub invite_code: String,
    pub referred_by_code: Option<String>,
    pub balance: f64,
    pub last_credit_amount: f64,
    pub wallet_addresses: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            invite_code: user.invite_code.clone(),
            referred_by_code: user.referred_by_code.clone(),
            balance: user.balance,
            last_credit_amount: user.last_credit_amount,
            wallet_addresses: user.wallet_addresses.to_projection(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAddressesResponse {
    pub wallet_addresses: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_user() -> User {
        User {
            id: UserId::from("u1"),
            identity_subject: None,
            display_name: Some("Alice".into()),
            email: None,
            invite_code: "AB12CD".into(),
            referred_by_code: None,
            balance: 0.0,
            last_credit_amount: 0.0,
            wallet_addresses: WalletAddresses::default(),
            created_at: Utc::now(),
            version: 0,
        }
    }

    #[test]
    fn test_chain_parsing() {
        assert_eq!("metamask".parse::<WalletChain>().unwrap(), WalletChain::Metamask);
        assert_eq!("trustWallet".parse::<WalletChain>().unwrap(), WalletChain::TrustWallet);
        let err = "phantom".parse::<WalletChain>().unwrap_err();
        assert_eq!(err.kind(), "UnknownChain");
    }

    #[test]
    fn test_hints_never_erase() {
        let mut user = blank_user();
        let changed = ProfileHints::new(Some("   "), None).apply_to(&mut user);
        assert!(!changed);
        assert_eq!(user.display_name.as_deref(), Some("Alice"));

        let changed = ProfileHints::new(None, Some(" Alice@Example.COM ")).apply_to(&mut user);
        assert!(changed);
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_wallet_projection_lists_every_chain() {
        let mut wallets = WalletAddresses::default();
        wallets.set(WalletChain::Metamask, Some("0xabc".into()));
        let projection = wallets.to_projection();
        assert_eq!(projection.get("metamask").map(String::as_str), Some("0xabc"));
        assert_eq!(projection.get("trustWallet").map(String::as_str), Some(""));

        wallets.set(WalletChain::Metamask, None);
        assert!(wallets.is_empty());
    }

    #[test]
    fn test_invite_details_has_no_private_fields() {
        let details = InviteDetails { invite_code: "AB12CD".into(), owner_display_name: Some("Alice".into()) };
        let json = serde_json::to_value(&details).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("inviteCode"));
        assert!(obj.contains_key("ownerDisplayName"));
    }
}
