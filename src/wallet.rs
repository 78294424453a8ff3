//! Withdrawal wallet addresses.
//!
//! Each chain slot is a plain overwrite; writing the value already stored is
//! a no-op that still succeeds. An empty address clears the slot.

use std::sync::Arc;

use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::model::{User, UserId, WalletChain};
use crate::storage::UserStore;

/// EVM addresses: `0x` followed by 40 hex digits.
const EVM_PREFIX: &str = "0x";
const EVM_HEX_LEN: usize = 40;

/// Validate `address` for `chain`. Returns `None` for "clear the slot".
pub fn validate_address(chain: WalletChain, address: &str) -> CoreResult<Option<String>> {
    let address = address.trim();
    if address.is_empty() {
        return Ok(None);
    }
    let valid = match chain {
        WalletChain::Metamask | WalletChain::TrustWallet => is_evm_address(address),
    };
    if !valid {
        return Err(CoreError::InvalidAddressFormat {
            chain: chain.to_string(),
            address: address.to_string(),
        });
    }
    Ok(Some(address.to_string()))
}

fn is_evm_address(address: &str) -> bool {
    match address.strip_prefix(EVM_PREFIX) {
        Some(hex) => hex.len() == EVM_HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

#[derive(Clone)]
pub struct WalletAddressManager {
    store: Arc<dyn UserStore>,
}

impl WalletAddressManager {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Set (or clear) the address for one chain. `chain` is the wire name,
    /// e.g. `"metamask"` or `"trustWallet"`.
    pub fn set_wallet_address(&self, user_id: &UserId, chain: &str, address: &str) -> CoreResult<User> {
        let chain: WalletChain = chain.parse()?;
        let address = validate_address(chain, address)?;
        let user = self.store.set_wallet_address(user_id, chain, address.as_deref())?;
        info!(
            user_id = %user_id,
            chain = %chain,
            address = address.as_deref().unwrap_or("<cleared>"),
            "Wallet address updated"
        );
        Ok(user)
    }
}
