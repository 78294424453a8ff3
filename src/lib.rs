//! Invite Ledger
//!
//! Referral & ledger backend for a token-reward application.
//!
//! ## Architecture
//!
//! - **Storage**: ReDB (ACID) + DashMap (read cache), or in-memory for tests
//! - **Server**: Axum
//! - **Auth**: HS256 bearer tokens carrying the verified identity subject
//! - **Invariants**: unique invite codes, set-once referral links,
//!   atomic additive credits

pub mod config;
pub mod error;
pub mod model;
pub mod storage;

pub mod identity;
pub mod invite;
pub mod ledger;
pub mod referral;
pub mod wallet;

pub mod admin;
pub mod auth;
pub mod routes;
pub mod service;

// ============================================================================
// PUBLIC API
// ============================================================================

pub use admin::AdminConsole;
pub use auth::{IdentityVerifier, JwtVerifier, VerifiedIdentity};
pub use config::{AppConfig, ConfigError};
pub use error::{CoreError, CoreResult};
pub use identity::IdentityResolver;
pub use invite::{CodeSource, InviteCodeGenerator, RandomCodeSource};
pub use ledger::{CreditReceipt, Ledger};
pub use model::{
    InviteDetails, ProfileHints, User, UserId, UserProfile, UserView, WalletAddressesResponse, WalletChain,
};
pub use referral::{LinkResult, ReferralLinker, ReferralRewards};
pub use routes::{router, AppState};
pub use service::{ReferralResponse, ReferralService, RegisterResponse};
pub use storage::{MemoryUserStore, RedbUserStore, StoreError, UserLookup, UserStore};
pub use wallet::WalletAddressManager;
