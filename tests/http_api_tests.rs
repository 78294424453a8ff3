// ============================================================================
// HTTP API TESTS
// ============================================================================
//
// Handlers are called directly with axum extractors:
// 1. Bearer auth on protected routes
// 2. Sync → referral → profile flow
// 3. Wallet address updates and validation errors
// 4. Public invite lookup does not leak private fields
// 5. Public registration and body hints cannot take over another account
//
// Run: cargo test --test http_api_tests

mod test_helpers;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;
use serde_json::json;

use invite_ledger::UserId;
use invite_ledger::routes::{
    invite_handler, profile_handler, referral_handler, register_handler, root_handler, sync_handler,
    wallet_address_handler, ProfileQuery, ReferralRequest, RegisterRequest, WalletAddressRequest,
};
use test_helpers::{create_empty_headers, create_jwt_headers, create_test_state, mint_token, rewards};

const ADDR: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

async fn sync(state: &invite_ledger::AppState, sub: &str) -> serde_json::Value {
    let Json(body) = sync_handler(State(state.clone()), create_jwt_headers(sub), Bytes::new())
        .await
        .unwrap();
    body
}

#[tokio::test]
async fn test_root_handler() {
    let Json(body) = root_handler().await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "invite-ledger");
}

#[tokio::test]
async fn test_protected_routes_require_bearer() {
    let state = create_test_state(&[], rewards(0.0, 0.0));

    let (status, Json(body)) = sync_handler(State(state.clone()), create_empty_headers(), Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "Unauthenticated");

    let mut forged = HeaderMap::new();
    forged.insert("Authorization", HeaderValue::from_static("Bearer not.a.jwt"));
    let (status, _) = profile_handler(State(state), forged, Query(ProfileQuery::default()))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sync_uses_token_claims_as_hints() {
    let state = create_test_state(&["AB12CD"], rewards(0.0, 0.0));
    let mut headers = HeaderMap::new();
    let token = mint_token("sub-alice", Some("Alice@Example.com"), Some("Alice"));
    headers.insert("Authorization", HeaderValue::from_str(&format!("Bearer {}", token)).unwrap());

    let Json(body) = sync_handler(State(state.clone()), headers, Bytes::new()).await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["inviteCode"], "AB12CD");
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["displayName"], "Alice");
    assert!(body["user"].get("identitySubject").is_none());

    // Body hints win over claims; the same user comes back.
    let Json(body) = sync_handler(
        State(state),
        create_jwt_headers("sub-alice"),
        Bytes::from_static(br#"{"displayName":"Alice B."}"#),
    )
    .await
    .unwrap();
    assert_eq!(body["user"]["inviteCode"], "AB12CD");
    assert_eq!(body["user"]["displayName"], "Alice B.");
}

#[tokio::test]
async fn test_sync_rejects_malformed_body() {
    let state = create_test_state(&[], rewards(0.0, 0.0));
    let (status, Json(body)) = sync_handler(State(state), create_jwt_headers("sub-a"), Bytes::from_static(b"{nope"))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_referral_flow_over_handlers() {
    let state = create_test_state(&["AB12CD", "BOB234", "ZZ99ZZ"], rewards(50.0, 0.0));
    sync(&state, "sub-alice").await;
    sync(&state, "sub-bob").await;
    sync(&state, "sub-zed").await;

    let Json(body) = referral_handler(
        State(state.clone()),
        create_jwt_headers("sub-bob"),
        Json(ReferralRequest { user_id: None, invite_code: "ab12cd".into() }),
    )
    .await
    .unwrap();
    assert_eq!(body["linked"], true);
    assert_eq!(body["referredByCode"], "AB12CD");

    let Json(body) = referral_handler(
        State(state.clone()),
        create_jwt_headers("sub-bob"),
        Json(ReferralRequest { user_id: None, invite_code: "ZZ99ZZ".into() }),
    )
    .await
    .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["linked"], false);
    assert_eq!(body["reason"], "AlreadyReferred");
    assert_eq!(body["referredByCode"], "AB12CD");

    let Json(body) = profile_handler(State(state), create_jwt_headers("sub-alice"), Query(ProfileQuery::default()))
        .await
        .unwrap();
    assert_eq!(body["profile"]["balance"], 50.0);
    assert_eq!(body["profile"]["lastCreditAmount"], 50.0);
}

#[tokio::test]
async fn test_self_referral_is_bad_request() {
    let state = create_test_state(&["AB12CD"], rewards(0.0, 0.0));
    sync(&state, "sub-alice").await;

    let (status, Json(body)) = referral_handler(
        State(state),
        create_jwt_headers("sub-alice"),
        Json(ReferralRequest { user_id: None, invite_code: "AB12CD".into() }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "SelfReferral");
}

#[tokio::test]
async fn test_profile_of_another_user_is_forbidden() {
    let state = create_test_state(&[], rewards(0.0, 0.0));
    let alice = sync(&state, "sub-alice").await;
    sync(&state, "sub-mallory").await;

    let query = ProfileQuery { user_id: alice["user"]["id"].as_str().map(str::to_string) };
    let (status, Json(body)) = profile_handler(State(state), create_jwt_headers("sub-mallory"), Query(query))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "Forbidden");
}

#[tokio::test]
async fn test_wallet_address_updates() {
    let state = create_test_state(&[], rewards(0.0, 0.0));
    sync(&state, "sub-alice").await;

    let set = |chain: &str, address: &str| WalletAddressRequest {
        user_id: None,
        chain: chain.to_string(),
        address: address.to_string(),
    };

    let Json(first) = wallet_address_handler(State(state.clone()), create_jwt_headers("sub-alice"), Json(set("metamask", ADDR)))
        .await
        .unwrap();
    let Json(second) = wallet_address_handler(State(state.clone()), create_jwt_headers("sub-alice"), Json(set("metamask", ADDR)))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(second["walletAddresses"], json!({ "metamask": ADDR, "trustWallet": "" }));

    let (status, Json(body)) =
        wallet_address_handler(State(state.clone()), create_jwt_headers("sub-alice"), Json(set("phantom", ADDR)))
            .await
            .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "UnknownChain");

    let (status, Json(body)) =
        wallet_address_handler(State(state.clone()), create_jwt_headers("sub-alice"), Json(set("trustWallet", "0x123")))
            .await
            .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InvalidAddressFormat");

    // Clearing
    let Json(body) = wallet_address_handler(State(state), create_jwt_headers("sub-alice"), Json(set("metamask", "")))
        .await
        .unwrap();
    assert_eq!(body["walletAddresses"]["metamask"], "");
}

#[tokio::test]
async fn test_invite_lookup_is_public_and_minimal() {
    let state = create_test_state(&["AB12CD"], rewards(0.0, 0.0));
    let mut headers = HeaderMap::new();
    let token = mint_token("sub-alice", Some("alice@example.com"), Some("Alice"));
    headers.insert("Authorization", HeaderValue::from_str(&format!("Bearer {}", token)).unwrap());
    sync_handler(State(state.clone()), headers, Bytes::new()).await.unwrap();

    let Json(body) = invite_handler(State(state.clone()), Path("ab12cd".to_string())).await.unwrap();
    assert_eq!(body["invite"], json!({ "inviteCode": "AB12CD", "ownerDisplayName": "Alice" }));

    let (status, Json(body)) = invite_handler(State(state), Path("NOPE99".to_string())).await.unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "InviteNotFound");
}

#[tokio::test]
async fn test_register_then_sync_adopts_user() {
    let state = create_test_state(&["AB12CD", "CAROL2"], rewards(10.0, 0.0));
    sync(&state, "sub-alice").await;

    let Json(body) = register_handler(
        State(state.clone()),
        Json(RegisterRequest {
            display_name: Some("Carol".into()),
            email: Some("carol@example.com".into()),
            referral_code: Some("AB12CD".into()),
        }),
    )
    .await
    .unwrap();
    assert!(body.get("created").is_none());
    assert_eq!(body["referral"]["linked"], true);
    let carol_id = body["user"]["id"].clone();

    let mut headers = HeaderMap::new();
    let token = mint_token("sub-carol", Some("carol@example.com"), None);
    headers.insert("Authorization", HeaderValue::from_str(&format!("Bearer {}", token)).unwrap());
    let Json(body) = sync_handler(State(state), headers, Bytes::new()).await.unwrap();
    assert_eq!(body["user"]["id"], carol_id);
    assert_eq!(body["user"]["referredByCode"], "AB12CD");
}

fn headers_with_email(sub: &str, email: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let token = mint_token(sub, Some(email), None);
    headers.insert("Authorization", HeaderValue::from_str(&format!("Bearer {}", token)).unwrap());
    headers
}

// ============================================================================
// ACCOUNT TAKEOVER
// ============================================================================

#[tokio::test]
async fn test_register_with_taken_email_is_conflict() {
    let state = create_test_state(&["VICTIM", "ATTACK"], rewards(25.0, 0.0));
    let Json(victim) = sync_handler(State(state.clone()), headers_with_email("sub-victim", "victim@example.com"), Bytes::new())
        .await
        .unwrap();
    sync(&state, "sub-attacker").await;

    let (status, Json(body)) = register_handler(
        State(state.clone()),
        Json(RegisterRequest {
            display_name: Some("Mallory".into()),
            email: Some("Victim@Example.com".into()),
            referral_code: Some("ATTACK".into()),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "EmailAlreadyRegistered");
    assert!(body.get("user").is_none());

    let Json(profile) = profile_handler(State(state.clone()), create_jwt_headers("sub-victim"), Query(ProfileQuery::default()))
        .await
        .unwrap();
    assert_eq!(profile["profile"]["referredByCode"], serde_json::Value::Null);
    assert_eq!(profile["profile"]["inviteCode"], victim["user"]["inviteCode"]);

    let Json(profile) = profile_handler(State(state), create_jwt_headers("sub-attacker"), Query(ProfileQuery::default()))
        .await
        .unwrap();
    assert_eq!(profile["profile"]["balance"], 0.0);
}

#[tokio::test]
async fn test_pre_registered_user_is_not_adopted_by_body_email() {
    let state = create_test_state(&["VICTIM", "ATTACK"], rewards(0.0, 0.0));
    let Json(registered) = register_handler(
        State(state.clone()),
        Json(RegisterRequest {
            display_name: Some("Victor".into()),
            email: Some("victim@example.com".into()),
            referral_code: None,
        }),
    )
    .await
    .unwrap();
    let victim_id = UserId::from(registered["user"]["id"].as_str().unwrap());
    state.service.credit_user(&victim_id, 500.0, "promo", None).unwrap();

    // Token without an email; the address only appears in the body.
    let Json(body) = sync_handler(
        State(state.clone()),
        create_jwt_headers("sub-attacker"),
        Bytes::from_static(br#"{"email":"victim@example.com"}"#),
    )
    .await
    .unwrap();
    assert_ne!(body["user"]["id"], registered["user"]["id"]);
    assert_eq!(body["user"]["inviteCode"], "ATTACK");

    // Token vouching for another address, body naming the victim.
    let Json(body) = sync_handler(
        State(state.clone()),
        headers_with_email("sub-other", "other@example.com"),
        Bytes::from_static(br#"{"email":"victim@example.com"}"#),
    )
    .await
    .unwrap();
    assert_ne!(body["user"]["id"], registered["user"]["id"]);

    let Json(profile) = profile_handler(State(state.clone()), create_jwt_headers("sub-attacker"), Query(ProfileQuery::default()))
        .await
        .unwrap();
    assert_eq!(profile["profile"]["balance"], 0.0);

    let victim = state.service.store().get(&victim_id).unwrap();
    assert!(victim.identity_subject.is_none());
    assert_eq!(victim.balance, 500.0);

    // The real owner, vouched for by the token, still adopts the record.
    let Json(body) = sync_handler(State(state), headers_with_email("sub-victim", "victim@example.com"), Bytes::new())
        .await
        .unwrap();
    assert_eq!(body["user"]["id"], registered["user"]["id"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_syncs_resolve_to_one_user() {
    let state = create_test_state(&[], rewards(0.0, 0.0));
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let state = state.clone();
            tokio::spawn(async move { sync(&state, "sub-race").await["user"]["id"].clone() })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(state.service.store().stats().unwrap().total_users, 1);
}
