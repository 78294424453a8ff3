// ============================================================================
// REDB USER STORE
// ============================================================================
//
// ReDB gives us ACID write transactions with a single writer, so every trait
// method that mutates runs inside exactly one write transaction: the
// uniqueness checks, the compare-and-set and the increments all see the same
// snapshot they commit against.
//
// ┌──────────────────────────────────────────────────────────┐
// │                    RedbUserStore                         │
// │        ┌──────────────┴───────────────┐                 │
// │        ▼                              ▼                 │
// │  DashMap (id → User)            ReDB (users.redb)       │
// │  versioned read cache           users / invite_codes /  │
// │                                 identities / emails /   │
// │                                 referrals / credits     │
// └──────────────────────────────────────────────────────────┘
//
// The cache only ever moves forward: an entry is replaced only by a record
// with a higher `version`, and deletions leave a tombstone.
//
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use tracing::{debug, info};

use super::{
    apply_credit, plan_link, unavailable, AttachOutcome, CreditOutcome, LinkOutcome, LinkPlan,
    NewUser, ReferralBonuses, StoreError, StoreResult, StoreStats, UserLookup, UserStore,
};
use crate::model::{normalize_email, normalize_invite_code, ProfileHints, User, UserId, WalletChain};

// ============================================================================
// TABLE DEFINITIONS
// ============================================================================

/// User documents: UserId → JSON
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Unique index: invite code → UserId. Entries are never removed.
const INVITE_CODES: TableDefinition<&str, &str> = TableDefinition::new("invite_codes");

/// Unique index: identity subject → UserId
const IDENTITIES: TableDefinition<&str, &str> = TableDefinition::new("identities");

/// Non-unique index: email → UserId
const EMAILS: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("emails");

/// Non-unique index: referrer invite code → referee UserId
const REFERRALS: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("referrals");

/// Applied credit dedupe keys: "{user_id}/{key}" → unix millis
const APPLIED_CREDITS: TableDefinition<&str, i64> = TableDefinition::new("applied_credits");

const TOMBSTONE: u64 = u64::MAX;

fn encode(user: &User) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(user).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode(bytes: &[u8]) -> StoreResult<User> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn read_user<T>(table: &T, id: &str) -> StoreResult<Option<User>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(id).map_err(unavailable)? {
        Some(guard) => decode(guard.value()).map(Some),
        None => Ok(None),
    }
}

fn read_index<T>(table: &T, key: &str) -> StoreResult<Option<String>>
where
    T: ReadableTable<&'static str, &'static str>,
{
    Ok(table.get(key).map_err(unavailable)?.map(|guard| guard.value().to_string()))
}

fn read_multi<T>(table: &T, key: &str) -> StoreResult<Vec<String>>
where
    T: ReadableMultimapTable<&'static str, &'static str>,
{
    let mut ids = Vec::new();
    for entry in table.get(key).map_err(unavailable)? {
        ids.push(entry.map_err(unavailable)?.value().to_string());
    }
    Ok(ids)
}

// ============================================================================
// STORE
// ============================================================================

/// ReDB-backed user store.
///
/// `Clone` is cheap (Arc handles). `get()` is served from the cache when
/// possible; every mutation is one ReDB write transaction.
#[derive(Clone)]
pub struct RedbUserStore {
    db: Arc<Database>,
    /// id → (version, record); `None` with `TOMBSTONE` marks a deleted user.
    cache: Arc<DashMap<UserId, (u64, Option<User>)>>,
}

impl RedbUserStore {
    /// Create or open the store under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        info!(path = %dir.display(), "Opening ReDB user store");

        std::fs::create_dir_all(dir).map_err(unavailable)?;
        let db = Database::create(dir.join("users.redb")).map_err(unavailable)?;

        let write_txn = db.begin_write().map_err(unavailable)?;
        {
            write_txn.open_table(USERS).map_err(unavailable)?;
            write_txn.open_table(INVITE_CODES).map_err(unavailable)?;
            write_txn.open_table(IDENTITIES).map_err(unavailable)?;
            write_txn.open_multimap_table(EMAILS).map_err(unavailable)?;
            write_txn.open_multimap_table(REFERRALS).map_err(unavailable)?;
            write_txn.open_table(APPLIED_CREDITS).map_err(unavailable)?;
        }
        write_txn.commit().map_err(unavailable)?;

        let store = Self {
            db: Arc::new(db),
            cache: Arc::new(DashMap::new()),
        };

        // Warm the cache
        let users = store.list_all()?;
        for user in &users {
            store.cache_put(user);
        }
        info!(users = users.len(), "User store loaded");

        Ok(store)
    }

    fn cache_put(&self, user: &User) {
        self.cache
            .entry(user.id.clone())
            .and_modify(|(version, cached)| {
                if *version < user.version {
                    *version = user.version;
                    *cached = Some(user.clone());
                }
            })
            .or_insert_with(|| (user.version, Some(user.clone())));
    }

    fn cache_tombstone(&self, id: &UserId) {
        self.cache.insert(id.clone(), (TOMBSTONE, None));
    }

    /// Resolve ids to users inside one read transaction.
    fn load_all(&self, ids: Vec<String>) -> StoreResult<Vec<User>> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let users = read_txn.open_table(USERS).map_err(unavailable)?;
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = read_user(&users, &id)? {
                found.push(user);
            }
        }
        Ok(found)
    }

    /// Read-modify-write of a single user inside one write transaction.
    /// `mutate` returns false to skip the write (no observable change).
    fn update_user<F>(&self, id: &UserId, mutate: F) -> StoreResult<User>
    where
        F: FnOnce(&mut User) -> StoreResult<bool>,
    {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let user = {
            let mut users = write_txn.open_table(USERS).map_err(unavailable)?;
            let mut user = read_user(&users, id.as_str())?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if mutate(&mut user)? {
                let bytes = encode(&user)?;
                users.insert(id.as_str(), bytes.as_slice()).map_err(unavailable)?;
            }
            user
        };
        write_txn.commit().map_err(unavailable)?;
        self.cache_put(&user);
        Ok(user)
    }
}

impl UserStore for RedbUserStore {
    fn insert(&self, new_user: NewUser) -> StoreResult<User> {
        let user = new_user.into_user();
        let bytes = encode(&user)?;

        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let mut codes = write_txn.open_table(INVITE_CODES).map_err(unavailable)?;
            if read_index(&codes, &user.invite_code)?.is_some() {
                return Err(StoreError::DuplicateInviteCode(user.invite_code));
            }
            let mut identities = write_txn.open_table(IDENTITIES).map_err(unavailable)?;
            if let Some(subject) = &user.identity_subject {
                if read_index(&identities, subject)?.is_some() {
                    return Err(StoreError::DuplicateIdentity(subject.clone()));
                }
                identities.insert(subject.as_str(), user.id.as_str()).map_err(unavailable)?;
            }
            codes.insert(user.invite_code.as_str(), user.id.as_str()).map_err(unavailable)?;

            if let Some(email) = &user.email {
                let mut emails = write_txn.open_multimap_table(EMAILS).map_err(unavailable)?;
                emails.insert(email.as_str(), user.id.as_str()).map_err(unavailable)?;
            }

            let mut users = write_txn.open_table(USERS).map_err(unavailable)?;
            users.insert(user.id.as_str(), bytes.as_slice()).map_err(unavailable)?;
        }
        // Dropping an uncommitted transaction aborts it, so the early
        // returns above leave nothing behind.
        write_txn.commit().map_err(unavailable)?;

        self.cache_put(&user);
        debug!(user_id = %user.id, invite_code = %user.invite_code, "User inserted");
        Ok(user)
    }

    fn get(&self, id: &UserId) -> StoreResult<User> {
        // Fast path: cache
        if let Some(entry) = self.cache.get(id) {
            return entry.1.clone().ok_or_else(|| StoreError::NotFound(id.to_string()));
        }

        // Slow path: disk
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let users = read_txn.open_table(USERS).map_err(unavailable)?;
        let user = read_user(&users, id.as_str())?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.cache_put(&user);
        Ok(user)
    }

    fn find(&self, lookup: &UserLookup) -> StoreResult<Vec<User>> {
        let ids = {
            let read_txn = self.db.begin_read().map_err(unavailable)?;
            match lookup {
                UserLookup::ByInviteCode(code) => {
                    let table = read_txn.open_table(INVITE_CODES).map_err(unavailable)?;
                    read_index(&table, &normalize_invite_code(code))?.into_iter().collect()
                }
                UserLookup::ByIdentitySubject(subject) => {
                    let table = read_txn.open_table(IDENTITIES).map_err(unavailable)?;
                    read_index(&table, subject)?.into_iter().collect()
                }
                UserLookup::ByEmail(email) => {
                    let table = read_txn.open_multimap_table(EMAILS).map_err(unavailable)?;
                    read_multi(&table, &normalize_email(email))?
                }
                UserLookup::ByReferrer(code) => {
                    let table = read_txn.open_multimap_table(REFERRALS).map_err(unavailable)?;
                    read_multi(&table, &normalize_invite_code(code))?
                }
            }
        };
        self.load_all(ids)
    }

    fn list_all(&self) -> StoreResult<Vec<User>> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(USERS).map_err(unavailable)?;

        let mut users = Vec::new();
        for entry in table.iter().map_err(unavailable)? {
            let (_, value) = entry.map_err(unavailable)?;
            users.push(decode(value.value())?);
        }
        Ok(users)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let users = read_txn.open_table(USERS).map_err(unavailable)?;
        let identities = read_txn.open_table(IDENTITIES).map_err(unavailable)?;

        let mut with_referral = 0;
        for entry in users.iter().map_err(unavailable)? {
            let (_, value) = entry.map_err(unavailable)?;
            if decode(value.value())?.referred_by_code.is_some() {
                with_referral += 1;
            }
        }
        Ok(StoreStats {
            total_users: users.len().map_err(unavailable)?,
            with_identity: identities.len().map_err(unavailable)?,
            with_referral,
        })
    }

    fn attach_identity(&self, id: &UserId, subject: &str) -> StoreResult<AttachOutcome> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let outcome = {
            let mut identities = write_txn.open_table(IDENTITIES).map_err(unavailable)?;
            if let Some(owner) = read_index(&identities, subject)? {
                if owner != id.as_str() {
                    return Err(StoreError::DuplicateIdentity(subject.to_string()));
                }
            }

            let mut users = write_txn.open_table(USERS).map_err(unavailable)?;
            let mut user = read_user(&users, id.as_str())?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if user.identity_subject.is_some() {
                AttachOutcome::AlreadyBound(user)
            } else {
                user.identity_subject = Some(subject.to_string());
                user.version += 1;
                let bytes = encode(&user)?;
                users.insert(id.as_str(), bytes.as_slice()).map_err(unavailable)?;
                identities.insert(subject, id.as_str()).map_err(unavailable)?;
                AttachOutcome::Attached(user)
            }
        };
        write_txn.commit().map_err(unavailable)?;

        if let AttachOutcome::Attached(user) = &outcome {
            self.cache_put(user);
        }
        Ok(outcome)
    }

    fn merge_profile(&self, id: &UserId, hints: &ProfileHints) -> StoreResult<User> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let user = {
            let mut users = write_txn.open_table(USERS).map_err(unavailable)?;
            let mut user = read_user(&users, id.as_str())?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let old_email = user.email.clone();
            if hints.apply_to(&mut user) {
                user.version += 1;
                let bytes = encode(&user)?;
                users.insert(id.as_str(), bytes.as_slice()).map_err(unavailable)?;

                if old_email != user.email {
                    let mut emails = write_txn.open_multimap_table(EMAILS).map_err(unavailable)?;
                    if let Some(old) = &old_email {
                        emails.remove(old.as_str(), id.as_str()).map_err(unavailable)?;
                    }
                    if let Some(new) = &user.email {
                        emails.insert(new.as_str(), id.as_str()).map_err(unavailable)?;
                    }
                }
            }
            user
        };
        write_txn.commit().map_err(unavailable)?;
        self.cache_put(&user);
        Ok(user)
    }

    fn set_referrer_if_unset(
        &self,
        id: &UserId,
        referrer_code: &str,
        bonuses: ReferralBonuses,
    ) -> StoreResult<LinkOutcome> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let outcome = {
            let codes = write_txn.open_table(INVITE_CODES).map_err(unavailable)?;
            let mut users = write_txn.open_table(USERS).map_err(unavailable)?;
            let mut user = read_user(&users, id.as_str())?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            let plan = plan_link(&user, referrer_code, |code| match read_index(&codes, code)? {
                Some(owner) => read_user(&users, &owner),
                None => Ok(None),
            })?;

            match plan {
                LinkPlan::AlreadyReferred(existing_code) => LinkOutcome::AlreadyReferred { user, existing_code },
                LinkPlan::SelfReferral => LinkOutcome::SelfReferral,
                LinkPlan::ReferrerMissing => LinkOutcome::ReferrerMissing,
                LinkPlan::Cycle => LinkOutcome::Cycle,
                LinkPlan::Proceed(mut referrer) => {
                    user.referred_by_code = Some(referrer_code.to_string());
                    user.version += 1;
                    if bonuses.referee > 0.0 {
                        apply_credit(&mut user, bonuses.referee);
                    }
                    if bonuses.referrer > 0.0 {
                        apply_credit(&mut referrer, bonuses.referrer);
                    }

                    let user_bytes = encode(&user)?;
                    let referrer_bytes = encode(&referrer)?;
                    users.insert(id.as_str(), user_bytes.as_slice()).map_err(unavailable)?;
                    users.insert(referrer.id.as_str(), referrer_bytes.as_slice()).map_err(unavailable)?;

                    let mut referrals = write_txn.open_multimap_table(REFERRALS).map_err(unavailable)?;
                    referrals.insert(referrer_code, id.as_str()).map_err(unavailable)?;

                    LinkOutcome::Linked { user, referrer }
                }
            }
        };

        match &outcome {
            LinkOutcome::Linked { user, referrer } => {
                write_txn.commit().map_err(unavailable)?;
                self.cache_put(user);
                self.cache_put(referrer);
            }
            // Nothing written; dropping the transaction aborts it.
            _ => drop(write_txn),
        }
        Ok(outcome)
    }

    fn credit(&self, id: &UserId, amount: f64, dedupe_key: Option<&str>) -> StoreResult<CreditOutcome> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let outcome = {
            let mut users = write_txn.open_table(USERS).map_err(unavailable)?;
            let mut user = read_user(&users, id.as_str())?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            let mut applied_credits = write_txn.open_table(APPLIED_CREDITS).map_err(unavailable)?;
            let marker = dedupe_key.map(|key| format!("{}/{}", id, key));
            let already_applied = match &marker {
                Some(m) => applied_credits.get(m.as_str()).map_err(unavailable)?.is_some(),
                None => false,
            };

            if already_applied {
                CreditOutcome { user, applied: false }
            } else {
                apply_credit(&mut user, amount);
                let bytes = encode(&user)?;
                users.insert(id.as_str(), bytes.as_slice()).map_err(unavailable)?;
                if let Some(m) = &marker {
                    let now = chrono::Utc::now().timestamp_millis();
                    applied_credits.insert(m.as_str(), now).map_err(unavailable)?;
                }
                CreditOutcome { user, applied: true }
            }
        };
        write_txn.commit().map_err(unavailable)?;
        self.cache_put(&outcome.user);
        Ok(outcome)
    }

    fn set_wallet_address(&self, id: &UserId, chain: WalletChain, address: Option<&str>) -> StoreResult<User> {
        self.update_user(id, |user| {
            if user.wallet_addresses.get(chain) == address {
                return Ok(false);
            }
            user.wallet_addresses.set(chain, address.map(str::to_string));
            user.version += 1;
            Ok(true)
        })
    }

    fn delete(&self, id: &UserId) -> StoreResult<User> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let user = {
            let mut users = write_txn.open_table(USERS).map_err(unavailable)?;
            let user = match users.remove(id.as_str()).map_err(unavailable)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StoreError::NotFound(id.to_string())),
            };

            // Invite code stays in INVITE_CODES: codes are never reissued.
            if let Some(subject) = &user.identity_subject {
                let mut identities = write_txn.open_table(IDENTITIES).map_err(unavailable)?;
                identities.remove(subject.as_str()).map_err(unavailable)?;
            }
            if let Some(email) = &user.email {
                let mut emails = write_txn.open_multimap_table(EMAILS).map_err(unavailable)?;
                emails.remove(email.as_str(), id.as_str()).map_err(unavailable)?;
            }
            if let Some(code) = &user.referred_by_code {
                let mut referrals = write_txn.open_multimap_table(REFERRALS).map_err(unavailable)?;
                referrals.remove(code.as_str(), id.as_str()).map_err(unavailable)?;
            }
            user
        };
        write_txn.commit().map_err(unavailable)?;

        self.cache_tombstone(id);
        info!(user_id = %id, invite_code = %user.invite_code, "User deleted");
        Ok(user)
    }
}

// ============================================================================
// TESTS
// ============================================================================
