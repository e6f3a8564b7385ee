//! Transit wrap/unwrap against a fake transit engine.
//!
//! The fake "wraps" by reversing the plaintext and tagging it with the key
//! name, so unwrapping under another tenant's key fails like the real engine.

use hdm_broker::{KeyTransit, VaultTransit, DEFAULT_TRANSIT_MOUNT};
use hdm_core::HdmError;
use hdm_crypto::{generate_data_key, DataKey};
use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct FakeTransit;

impl Respond for FakeTransit {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let segments: Vec<&str> = request.url.path().split('/').collect();
        // ["", "v1", mount, op, key]
        let (op, key) = (segments[3], segments[4]);
        let body: Value = serde_json::from_slice(&request.body).unwrap();

        match op {
            "encrypt" => {
                let plaintext = body["plaintext"].as_str().unwrap();
                let reversed: String = plaintext.chars().rev().collect();
                ResponseTemplate::new(200).set_body_json(json!({
                    "data": {"ciphertext": format!("vault:v1:{key}:{reversed}")}
                }))
            }
            "decrypt" => {
                let ciphertext = body["ciphertext"].as_str().unwrap();
                match ciphertext.strip_prefix(&format!("vault:v1:{key}:")) {
                    Some(rest) => {
                        let plaintext: String = rest.chars().rev().collect();
                        ResponseTemplate::new(200)
                            .set_body_json(json!({"data": {"plaintext": plaintext}}))
                    }
                    None => ResponseTemplate::new(400).set_body_json(json!({
                        "errors": ["cipher: message authentication failed"]
                    })),
                }
            }
            _ => ResponseTemplate::new(404),
        }
    }
}

async fn fake_engine() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(format!(
            "^/v1/{DEFAULT_TRANSIT_MOUNT}/(encrypt|decrypt)/[^/]+$"
        )))
        .and(header("x-vault-token", "s.test"))
        .respond_with(FakeTransit)
        .mount(&server)
        .await;
    server
}

fn transit(server: &MockServer) -> VaultTransit {
    VaultTransit::new(
        server.uri(),
        SecretString::from("s.test"),
        DEFAULT_TRANSIT_MOUNT,
    )
    .unwrap()
}

#[tokio::test]
async fn wrap_then_unwrap_returns_data_key() {
    let server = fake_engine().await;
    let transit = transit(&server);

    let key = generate_data_key();
    let wrapped = transit.wrap_key("cloud-beacon", &key.to_base64()).await.unwrap();
    assert!(wrapped.starts_with("vault:v1:cloud-beacon:"));
    assert!(!wrapped.contains(&key.to_base64()));

    // wrapped keys are read back from disk with a trailing newline
    let unwrapped = transit
        .unwrap_key("cloud-beacon", &format!("{wrapped}\n"))
        .await
        .unwrap();
    let restored = DataKey::from_base64(&unwrapped).unwrap();
    assert_eq!(restored.as_bytes(), key.as_bytes());
}

#[tokio::test]
async fn unwrap_under_other_tenant_fails() {
    let server = fake_engine().await;
    let transit = transit(&server);

    let wrapped = transit.wrap_key("tenant-a", "c2VjcmV0").await.unwrap();
    let err = transit.unwrap_key("tenant-b", &wrapped).await.unwrap_err();

    match err {
        HdmError::KeyUnwrap { tenant, source } => {
            assert_eq!(tenant, "tenant-b");
            assert!(
                matches!(*source, HdmError::Protocol { status: 400, .. }),
                "{source:?}"
            );
        }
        other => panic!("expected key unwrap error, got {other:?}"),
    }
}

#[tokio::test]
async fn forbidden_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]})),
        )
        .mount(&server)
        .await;
    let transit = transit(&server);

    let err = transit.wrap_key("t", "c2VjcmV0").await.unwrap_err();
    assert!(matches!(err, HdmError::Auth(_)), "{err:?}");
    assert!(err.to_string().contains("permission denied"));

    let err = transit.unwrap_key("t", "vault:v1:x").await.unwrap_err();
    assert!(matches!(
        err,
        HdmError::KeyUnwrap { ref source, .. } if matches!(**source, HdmError::Auth(_))
    ));
}

#[tokio::test]
async fn missing_data_field_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"warnings": null})))
        .mount(&server)
        .await;
    let transit = transit(&server);

    let err = transit.wrap_key("t", "c2VjcmV0").await.unwrap_err();
    assert!(matches!(
        err,
        HdmError::MalformedResponse { service: "transit engine", .. }
    ));
}
