//! Administrative lookups and deletion.
//!
//! Lookups go through the closed [`UserLookup`] set only. Deletion is
//! explicit and irreversible; the deleted user's invite code stays reserved.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::model::{normalize_email, User};
use crate::storage::{StoreStats, UserLookup, UserStore};

#[derive(Clone)]
pub struct AdminConsole {
    store: Arc<dyn UserStore>,
}

impl AdminConsole {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub fn find(&self, lookup: &UserLookup) -> CoreResult<Vec<User>> {
        Ok(self.store.find(lookup)?)
    }

    /// Every user, newest first.
    pub fn all_users(&self) -> CoreResult<Vec<User>> {
        let mut users = self.store.list_all()?;
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    pub fn stats(&self) -> CoreResult<StoreStats> {
        Ok(self.store.stats()?)
    }

    /// Delete every user holding `email`. Returns the removed records.
    pub fn delete_by_email(&self, email: &str) -> CoreResult<Vec<User>> {
        let email = normalize_email(email);
        let matches = self.store.find(&UserLookup::ByEmail(email.clone()))?;
        if matches.is_empty() {
            return Err(CoreError::UserNotFound(email));
        }

        let mut deleted = Vec::with_capacity(matches.len());
        for user in matches {
            let removed = self.store.delete(&user.id)?;
            warn!(
                user_id = %removed.id,
                email = %email,
                invite_code = %removed.invite_code,
                "🗑️ User deleted by administrator"
            );
            deleted.push(removed);
        }
        info!(email = %email, count = deleted.len(), "Administrative deletion complete");
        Ok(deleted)
    }
}
