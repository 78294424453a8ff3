// ============================================================================
// TEST HELPERS: shared utilities for integration tests
// ============================================================================

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;

use invite_ledger::auth::Claims;
use invite_ledger::{
    AppState, CodeSource, InviteCodeGenerator, JwtVerifier, MemoryUserStore, RandomCodeSource,
    RedbUserStore, ReferralRewards, ReferralService, UserStore,
};

pub const JWT_SECRET: &str = "super-secret-jwt-token-with-at-least-32-bytes-long";

/// Hands out the given codes in order, then random ones.
pub struct ScriptedCodes(Mutex<VecDeque<String>>);

impl ScriptedCodes {
    pub fn new(codes: &[&str]) -> Self {
        ScriptedCodes(Mutex::new(codes.iter().map(|c| c.to_string()).collect()))
    }
}

impl CodeSource for ScriptedCodes {
    fn next_code(&self, length: usize) -> String {
        self.0
            .lock()
            .pop_front()
            .unwrap_or_else(|| RandomCodeSource.next_code(length))
    }
}

pub fn scripted_generator(codes: &[&str]) -> InviteCodeGenerator {
    InviteCodeGenerator::with_source(Arc::new(ScriptedCodes::new(codes)), 6, 5)
}

pub fn rewards(referrer_bonus: f64, referee_bonus: f64) -> ReferralRewards {
    ReferralRewards { referrer_bonus, referee_bonus }
}

pub fn memory_service(codes: &[&str], rewards: ReferralRewards) -> Arc<ReferralService> {
    let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
    Arc::new(ReferralService::new(store, scripted_generator(codes), rewards).unwrap())
}

/// Keep the returned `TempDir` alive for the duration of the test.
pub fn redb_store() -> (Arc<RedbUserStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RedbUserStore::open(dir.path()).unwrap());
    (store, dir)
}

pub fn create_test_state(codes: &[&str], rewards: ReferralRewards) -> AppState {
    let verifier = Arc::new(JwtVerifier::new(JWT_SECRET, None, None));
    AppState::new(memory_service(codes, rewards), verifier)
}

/// Create empty headers (for unauthenticated tests)
pub fn create_empty_headers() -> HeaderMap {
    HeaderMap::new()
}

pub fn mint_token(sub: &str, email: Option<&str>, name: Option<&str>) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: 20000000000, // far future
        email: email.map(str::to_string),
        name: name.map(str::to_string),
        iss: None,
        aud: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

/// Bearer headers for `sub`.
pub fn create_jwt_headers(sub: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let token = mint_token(sub, None, None);
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    headers
}
