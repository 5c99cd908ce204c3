//! Tests of the federated token vault paths against a stub vault.

mod common;

use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;
use xaa_broker::auth::UserIdentity;
use xaa_broker::broker::Broker;
use xaa_broker::config::{Config, VaultConfig};
use xaa_broker::vault::{CredentialDenial, ProviderCredentialOutcome, TokenVault, VaultError};

use common::{STUB_ID_JAG, spawn_vault};

fn vault_client(base_url: &str) -> TokenVault {
    TokenVault::new(
        reqwest::Client::new(),
        VaultConfig {
            domain: "unused.example.com".to_string(),
            base_url: Some(base_url.to_string()),
            client_id: "vault-client-1".to_string(),
            client_secret: Some("vault-secret".to_string()),
            instance_url: Some("https://acme.my.crm.example".to_string()),
            ..VaultConfig::default()
        },
    )
}

// =============================================================================
// Management credential
// =============================================================================

#[tokio::test]
async fn management_credential_is_fetched_once_within_ttl() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    // Cold start populates the cache.
    let first = vault.management_credential().await.unwrap();
    assert_eq!(first, "vault-mgmt-token");

    // Concurrent calls within the TTL window reuse the cached credential.
    let (a, b, c) = tokio::join!(
        vault.management_credential(),
        vault.management_credential(),
        vault.management_credential(),
    );
    assert_eq!(a.unwrap(), "vault-mgmt-token");
    assert_eq!(b.unwrap(), "vault-mgmt-token");
    assert_eq!(c.unwrap(), "vault-mgmt-token");

    assert_eq!(stub.management_grants.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn management_credential_failure_is_fatal() {
    // Nothing listening: the client-credentials grant must surface an error.
    let vault = TokenVault::new(
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(200))
            .build()
            .unwrap(),
        VaultConfig {
            domain: "unused.example.com".to_string(),
            base_url: Some("http://127.0.0.1:1".to_string()),
            client_id: "vault-client-1".to_string(),
            client_secret: Some("vault-secret".to_string()),
            ..VaultConfig::default()
        },
    );

    let result = vault.management_credential().await;
    assert!(matches!(result, Err(VaultError::Http(_))));
}

// =============================================================================
// Delegated vault access
// =============================================================================

#[tokio::test]
async fn assertion_exchange_for_vault_access_grants() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    let outcome = vault.exchange_assertion_for_access(STUB_ID_JAG).await;
    assert!(outcome.is_granted());
}

#[tokio::test]
async fn assertion_exchange_denial_is_a_value_not_an_error() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    let outcome = vault.exchange_assertion_for_access("unlinked-assertion").await;
    assert!(!outcome.is_granted());
}

// =============================================================================
// User resolution and linked credentials
// =============================================================================

#[tokio::test]
async fn resolve_user_id_finds_federated_user() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    let user_id = vault.resolve_user_id("user-42").await.unwrap();
    assert_eq!(user_id.as_deref(), Some("auth0|user-42"));
}

#[tokio::test]
async fn resolve_user_id_returns_none_for_unknown_subject() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    // Zero search results is a normal state, not an error.
    let user_id = vault.resolve_user_id("stranger-99").await.unwrap();
    assert!(user_id.is_none());
}

#[tokio::test]
async fn linked_credential_is_returned_for_connected_user() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    let outcome = vault
        .linked_provider_credential("auth0|user-42", None)
        .await
        .unwrap();

    match outcome {
        ProviderCredentialOutcome::Connected(credential) => {
            assert_eq!(credential.access_token, "sf-access-token");
            assert_eq!(credential.refresh_token.as_deref(), Some("sf-refresh-token"));
            assert_eq!(
                credential.instance_url.as_deref(),
                Some("https://acme.my.crm.example")
            );
        }
        ProviderCredentialOutcome::Denied(reason) => panic!("denied: {reason}"),
    }
}

#[tokio::test]
async fn linked_credential_denials_are_distinct() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    let outcome = vault
        .linked_provider_credential("auth0|other-provider", None)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProviderCredentialOutcome::Denied(CredentialDenial::ProviderNotConnected)
    ));

    let outcome = vault
        .linked_provider_credential("auth0|no-token", None)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProviderCredentialOutcome::Denied(CredentialDenial::NoTokenAvailable)
    ));

    let outcome = vault
        .linked_provider_credential("auth0|missing", None)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProviderCredentialOutcome::Denied(CredentialDenial::UserNotFound)
    ));
}

#[tokio::test]
async fn linked_credential_accepts_delegated_token() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    // Using a delegated vault token skips the management credential path.
    let outcome = vault
        .linked_provider_credential("auth0|user-42", Some("vault-delegated-token"))
        .await
        .unwrap();
    assert!(outcome.is_connected());
    assert_eq!(stub.management_grants.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connection_probe_reflects_linkage() {
    let stub = spawn_vault().await;
    let vault = vault_client(&stub.base_url);

    assert!(vault.check_provider_connection("auth0|user-42").await.unwrap());
    assert!(!vault.check_provider_connection("auth0|no-token").await.unwrap());
}

// =============================================================================
// Broker composition
// =============================================================================

fn identity(sub: &str) -> UserIdentity {
    UserIdentity {
        sub: sub.to_string(),
        email: format!("{sub}@acme.com"),
        name: None,
        given_name: None,
        family_name: None,
        groups: vec![],
    }
}

#[tokio::test]
async fn broker_resolves_user_then_reads_linked_credential() {
    let stub = spawn_vault().await;
    let config = Config {
        vault: VaultConfig {
            domain: "unused.example.com".to_string(),
            base_url: Some(stub.base_url.clone()),
            client_id: "vault-client-1".to_string(),
            client_secret: Some("vault-secret".to_string()),
            ..VaultConfig::default()
        },
        ..Config::default()
    };
    let broker = Broker::new(config).unwrap();

    let outcome = broker.provider_credential(&identity("user-42")).await.unwrap();
    assert!(outcome.is_connected());

    // A subject the vault has never seen resolves to a clean denial.
    let outcome = broker
        .provider_credential(&identity("stranger-99"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProviderCredentialOutcome::Denied(CredentialDenial::UserNotFound)
    ));
}
