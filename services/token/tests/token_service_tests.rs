//! Integration tests for token issuance and verification.

use async_trait::async_trait;
use latchkey_token::jwk::Jwk;
use latchkey_token::keys::{DatabaseKeyProvider, FileKeyProvider, KeyProvider, MemoryKvStore};
use latchkey_token::{
    generate_key, get_is_admin, Config, KeysConfig, KeysStorage, TokenError, TokenService,
    TokenValidationError, User,
};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const CLIENT_ID: &str = "client-1";

fn config() -> Config {
    Config::new(KeysConfig::file("unused"))
}

fn service() -> TokenService {
    TokenService::with_key(&config(), generate_key("ES256", "").unwrap()).unwrap()
}

/// Provider that records calls, for checking the startup state machine.
#[derive(Default)]
struct RecordingProvider {
    key: Mutex<Option<Jwk>>,
    saves: AtomicUsize,
}

#[async_trait]
impl KeyProvider for RecordingProvider {
    async fn load_key(&self) -> Result<Option<Jwk>, TokenError> {
        Ok(self.key.lock().unwrap().clone())
    }

    async fn save_key(&self, key: &Jwk) -> Result<(), TokenError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.key.lock().unwrap() = Some(key.clone());
        Ok(())
    }

    fn storage(&self) -> KeysStorage {
        KeysStorage::File
    }
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn test_first_boot_generates_and_saves_once() {
    let provider = RecordingProvider::default();

    let first = TokenService::new(&config(), &provider).await.unwrap();
    assert_eq!(provider.saves.load(Ordering::SeqCst), 1);
    assert_eq!(first.get_key_alg().as_str(), "RS256");

    let second = TokenService::new(&config(), &provider).await.unwrap();
    assert_eq!(provider.saves.load(Ordering::SeqCst), 1);
    assert_eq!(second.key_id(), first.key_id());
}

#[tokio::test]
async fn test_restart_keeps_verifying_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FileKeyProvider::new(dir.path(), None);
    provider
        .save_key(&generate_key("EdDSA", "Ed25519").unwrap())
        .await
        .unwrap();

    let before = TokenService::new(&config(), &provider).await.unwrap();
    let token = before.generate_access_token(&User::new("user-1")).unwrap();

    let after = TokenService::new(&config(), &provider).await.unwrap();
    let claims = after.verify_access_token(&token).unwrap();
    assert_eq!(claims.sub.as_deref(), Some("user-1"));
    assert_eq!(after.get_public_jwks_as_json(), before.get_public_jwks_as_json());
}

#[tokio::test]
async fn test_database_first_boot() {
    let kek = latchkey_token::crypto::derive_kek(b"secret", "instance").unwrap();
    let provider = DatabaseKeyProvider::new(Arc::new(MemoryKvStore::new()), Some(kek)).unwrap();

    let first = TokenService::new(&config(), &provider).await.unwrap();
    let second = TokenService::new(&config(), &provider).await.unwrap();
    assert_eq!(first.key_id(), second.key_id());
}

#[tokio::test]
async fn test_public_key_only_is_rejected() {
    let provider = RecordingProvider::default();
    *provider.key.lock().unwrap() = Some(generate_key("ES256", "").unwrap().to_public());

    let result = TokenService::new(&config(), &provider).await;
    assert!(matches!(result, Err(TokenError::InvalidKey(_))));
}

// =============================================================================
// Type isolation
// =============================================================================

#[test]
fn test_no_token_verifies_as_another_type() {
    let service = service();
    let user = User::new("user-1");

    // Audience of every token is the app URL so only the type tells them apart.
    let app_url = config().app_url;
    let tokens = [
        ("access", service.generate_access_token(&user).unwrap()),
        ("id", service.generate_id_token(&Map::new(), &app_url, "").unwrap()),
        ("oauth-access", service.generate_oauth_access_token(&user, &app_url).unwrap()),
        (
            "refresh",
            service
                .generate_oauth_refresh_token("user-1", &app_url, "rt")
                .unwrap(),
        ),
    ];

    for (kind, token) in &tokens {
        let results = [
            ("access", service.verify_access_token(token).map(|_| ())),
            ("id", service.verify_id_token(token, false).map(|_| ())),
            ("oauth-access", service.verify_oauth_access_token(token).map(|_| ())),
            ("refresh", service.verify_oauth_refresh_token(token).map(|_| ())),
        ];
        for (verifier, result) in results {
            if verifier == *kind {
                assert!(result.is_ok(), "{kind} should verify as {verifier}");
            } else {
                assert!(
                    matches!(
                        result,
                        Err(TokenError::Validation(TokenValidationError::WrongType { .. }))
                    ),
                    "{kind} must not verify as {verifier}"
                );
            }
        }
    }
}

#[test]
fn test_token_from_other_key_is_rejected() {
    let issuer = service();
    let verifier = service();
    let token = issuer.generate_access_token(&User::new("user-1")).unwrap();

    assert!(matches!(
        verifier.verify_access_token(&token),
        Err(TokenError::Validation(TokenValidationError::BadSignature))
    ));
}

#[test]
fn test_token_from_other_algorithm_is_rejected() {
    let issuer = TokenService::with_key(&config(), generate_key("EdDSA", "Ed25519").unwrap()).unwrap();
    let token = issuer.generate_access_token(&User::new("user-1")).unwrap();

    assert!(matches!(
        service().verify_access_token(&token),
        Err(TokenError::Validation(
            TokenValidationError::AlgorithmMismatch { .. }
        ))
    ));
}

#[test]
fn test_wrong_issuer_is_rejected() {
    let mut other = config();
    other.app_url = "https://other.example".to_string();
    let key = generate_key("ES256", "").unwrap();

    let issuer = TokenService::with_key(&other, key.clone()).unwrap();
    let verifier = TokenService::with_key(&config(), key).unwrap();
    let token = issuer
        .generate_oauth_access_token(&User::new("user-1"), CLIENT_ID)
        .unwrap();

    assert!(matches!(
        verifier.verify_oauth_access_token(&token),
        Err(TokenError::Validation(TokenValidationError::BadIssuer))
    ));
}

// =============================================================================
// Claims
// =============================================================================

#[test]
fn test_admin_claim() {
    let service = service();

    let token = service.generate_access_token(&User::new("user-1")).unwrap();
    let (_, claims) = service.get_token_type(&token).unwrap();
    assert!(serde_json::to_value(&claims).unwrap().get("isAdmin").is_none());
    assert!(!get_is_admin(&claims));

    let token = service
        .generate_access_token(&User::new("root").with_admin(true))
        .unwrap();
    let claims = service.verify_access_token(&token).unwrap();
    assert_eq!(serde_json::to_value(&claims).unwrap()["isAdmin"], json!(true));
    assert!(get_is_admin(&claims));
}

#[test]
fn test_expired_id_token() {
    let service = service();
    let mut claims = service.build_id_token(&Map::new(), CLIENT_ID, "").unwrap();
    let issued = chrono::Utc::now().timestamp() - 2 * 3600;
    claims.iat = Some(issued);
    claims.exp = Some(issued + 3600);
    let token = service.sign_token(&claims).unwrap();

    assert!(matches!(
        service.verify_id_token(&token, false),
        Err(TokenError::Validation(TokenValidationError::Expired))
    ));
    let claims = service.verify_id_token(&token, true).unwrap();
    assert!(claims.aud.unwrap().contains(CLIENT_ID));
}

#[test]
fn test_clock_skew_tolerance() {
    let service = service();
    let now = chrono::Utc::now().timestamp();

    let mut claims = service
        .build_oauth_access_token(&User::new("user-1"), CLIENT_ID);
    claims.exp = Some(now - 30);
    let token = service.sign_token(&claims).unwrap();
    assert!(service.verify_oauth_access_token(&token).is_ok());

    claims.exp = Some(now - 120);
    let token = service.sign_token(&claims).unwrap();
    assert!(service.verify_oauth_access_token(&token).is_err());
}

#[test]
fn test_id_token_user_claims() {
    let service = service();
    let user_claims: Map<String, Value> = serde_json::from_value(json!({
        "sub": "user-1",
        "email": "ada@example.com",
        "email_verified": true,
        "groups": ["admins", "ops"],
        "iss": "https://forged.example",
    }))
    .unwrap();

    let token = service.generate_id_token(&user_claims, CLIENT_ID, "nonce-1").unwrap();
    let claims = service.verify_id_token(&token, false).unwrap();

    assert_eq!(claims.iss.as_deref(), Some("http://localhost:1411"));
    assert_eq!(claims.get("email_verified"), Some(json!(true)));
    assert_eq!(claims.get("groups"), Some(json!(["admins", "ops"])));
    assert_eq!(claims.nonce.as_deref(), Some("nonce-1"));
}

#[test]
fn test_refresh_token_returns_grant() {
    let service = service();
    let token = service
        .generate_oauth_refresh_token("user-1", CLIENT_ID, "opaque")
        .unwrap();

    let (user_id, client_id, rt) = service.verify_oauth_refresh_token(&token).unwrap();
    assert_eq!((user_id.as_str(), client_id.as_str(), rt.as_str()), ("user-1", CLIENT_ID, "opaque"));

    let (token_type, _) = service.get_token_type(&token).unwrap();
    assert_eq!(token_type, "refresh-token");
}

#[test]
fn test_service_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<TokenService>();
}

// =============================================================================
// Tampering
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_tampered_payload_is_rejected(sub in "[a-zA-Z0-9]{1,24}", other in "[a-zA-Z0-9]{1,24}") {
        prop_assume!(sub != other);
        let service = service();
        let token = service.generate_access_token(&User::new(sub.clone())).unwrap();

        let forged_claims = {
            let (_, mut claims) = service.get_token_type(&token).unwrap();
            claims.sub = Some(other);
            claims
        };
        let forged_payload = {
            use base64::Engine;
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .encode(serde_json::to_vec(&forged_claims).unwrap())
        };

        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        prop_assert!(service.verify_access_token(&forged).is_err());
        prop_assert!(service.verify_access_token(&token).is_ok());
    }
}
