//! Balance mutation primitive.
//!
//! `credit` is an additive, atomic increment executed by the store; callers
//! never read a balance, add to it and write it back. Caps and claim
//! frequency policies belong to callers layered above this type.

use std::sync::Arc;

use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::model::UserId;
use crate::storage::UserStore;

/// Result of a credit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditReceipt {
    pub new_balance: f64,
    /// False when a deduplicated credit had already been applied.
    pub applied: bool,
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn UserStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Amounts must be finite and non-negative.
    pub fn validate_amount(amount: f64) -> CoreResult<f64> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(CoreError::InvalidAmount(amount));
        }
        Ok(amount)
    }

    /// Atomically add `amount` to the user's balance and return the new balance.
    ///
    /// Not idempotent: a retried call credits twice. Callers that can retry
    /// should use [`Ledger::credit_once`].
    pub fn credit(&self, user_id: &UserId, amount: f64, reason: &str) -> CoreResult<f64> {
        let amount = Self::validate_amount(amount)?;
        let outcome = self.store.credit(user_id, amount, None)?;
        info!(
            user_id = %user_id,
            amount = amount,
            reason = %reason,
            new_balance = outcome.user.balance,
            "✅ Balance credited"
        );
        Ok(outcome.user.balance)
    }

    /// Credit at most once per `(user_id, request_id)`.
    pub fn credit_once(
        &self,
        user_id: &UserId,
        amount: f64,
        reason: &str,
        request_id: &str,
    ) -> CoreResult<CreditReceipt> {
        let amount = Self::validate_amount(amount)?;
        let outcome = self.store.credit(user_id, amount, Some(request_id))?;
        if outcome.applied {
            info!(
                user_id = %user_id,
                amount = amount,
                reason = %reason,
                request_id = %request_id,
                new_balance = outcome.user.balance,
                "✅ Balance credited"
            );
        } else {
            info!(user_id = %user_id, request_id = %request_id, "Duplicate credit request ignored");
        }
        Ok(CreditReceipt {
            new_balance: outcome.user.balance,
            applied: outcome.applied,
        })
    }
}
