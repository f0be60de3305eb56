//! End-to-end tests of `MerchantClient` against a mock platform.
//!
//! The mock signs its responses with the platform A fixture key and serves
//! the encrypted certificate list for platform A and B.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use mch_guard::{
    GuardError, MerchantClient,
    auth::ResponseHeaders,
    certs::RotationState,
    cipher::{ApiV3Key, EncryptedResource},
    config::ClientConfig,
    credential::{Credential, parse_private_key_pem},
    transport::HttpTransport,
};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use wiremock::{
    Mock, MockServer, Request, ResponseTemplate,
    matchers::{header_exists, method, path, query_param},
};

const MERCHANT_KEY: &str = include_str!("fixtures/merchant_key.pem");
const PLATFORM_A_KEY: &str = include_str!("fixtures/platform_a_key.pem");
const PLATFORM_B_KEY: &str = include_str!("fixtures/platform_b_key.pem");
const CERTIFICATES: &str = include_str!("fixtures/certificates_response.json");
const PLATFORM_A_SERIAL: &str = "3C8F1A2B4D6E7F8091A2B3C4D5E6F708192A3B4C";
const PLATFORM_B_SERIAL: &str = "7A1B2C3D4E5F60718293A4B5C6D7E8F901234567";
const API_V3_KEY: &str = "0123456789abcdef0123456789ABCDEF";
const BALANCE: &str = r#"{"available_amount":10000,"pending_amount":0}"#;

fn sign_response(key: &RsaPrivateKey, timestamp: &str, nonce: &str, body: &[u8]) -> String {
    let mut message = format!("{timestamp}\n{nonce}\n").into_bytes();
    message.extend_from_slice(body);
    message.push(b'\n');
    let digest = Sha256::digest(&message);
    STANDARD.encode(key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap())
}

fn signed(body: &str, serial: &str, key: &RsaPrivateKey) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("Wechatpay-Timestamp", "1700000000")
        .insert_header("Wechatpay-Nonce", "mocknonce01")
        .insert_header("Wechatpay-Serial", serial)
        .insert_header(
            "Wechatpay-Signature",
            sign_response(key, "1700000000", "mocknonce01", body.as_bytes()),
        )
        .set_body_raw(body.to_owned(), "application/json")
}

fn authorization_field(request: &Request, name: &str) -> String {
    let authorization = request.headers.get("authorization").unwrap().to_str().unwrap();
    authorization
        .strip_prefix("WECHATPAY2-SHA256-RSA2048 ")
        .unwrap()
        .split(',')
        .find_map(|kv| kv.strip_prefix(&format!("{name}=\"")))
        .and_then(|v| v.strip_suffix('"'))
        .unwrap()
        .to_owned()
}

/// Checks the Authorization signature the way the platform does: over the
/// method, path and query as they arrived on the wire.
fn verify_request_signature(request: &Request) {
    let path_with_query = match request.url.query() {
        Some(query) => format!("{}?{query}", request.url.path()),
        None => request.url.path().to_owned(),
    };
    let mut canonical = format!(
        "{}\n{path_with_query}\n{}\n{}\n",
        request.method,
        authorization_field(request, "timestamp"),
        authorization_field(request, "nonce_str"),
    )
    .into_bytes();
    canonical.extend_from_slice(&request.body);
    canonical.push(b'\n');

    let digest = Sha256::digest(&canonical);
    let signature = STANDARD.decode(authorization_field(request, "signature")).unwrap();
    let merchant = parse_private_key_pem(MERCHANT_KEY).unwrap().to_public_key();
    merchant.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature).unwrap();
}

fn client_for(server: &MockServer) -> MerchantClient<HttpTransport> {
    let config = ClientConfig {
        private_key_pem: Some(MERCHANT_KEY.to_owned()),
        base_url: server.uri(),
        ..ClientConfig::new("1900000001", "MERCHANTSERIAL01")
    };
    let credential = Credential::from_pem("1900000001", "MERCHANTSERIAL01", MERCHANT_KEY).unwrap();
    let transport = HttpTransport::with_config(&config.http).unwrap();
    MerchantClient::new(config, credential, ApiV3Key::new(API_V3_KEY).unwrap(), transport).unwrap()
}

async fn mount_certificates(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v3/certificates"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(CERTIFICATES, "application/json"))
        .mount(server)
        .await;
}

async fn bootstrapped(server: &MockServer) -> MerchantClient<HttpTransport> {
    mount_certificates(server).await;
    let client = client_for(server);
    client.refresh_certificates(None).await.unwrap();
    client
}

#[tokio::test]
async fn test_bootstrap_loads_certificates() {
    let server = MockServer::start().await;
    mount_certificates(&server).await;
    let client = client_for(&server);
    assert_eq!(client.rotation_state(), RotationState::Empty);

    let generation = client.refresh_certificates(None).await.unwrap();

    assert_eq!(generation, 1);
    assert_eq!(client.rotation_state(), RotationState::Ready);
    assert_eq!(client.certificates().serials(), vec![PLATFORM_A_SERIAL, PLATFORM_B_SERIAL]);
}

#[tokio::test]
async fn test_certificate_view_is_a_snapshot_of_the_rotator_store() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    let before = client.certificates();

    client.refresh_certificates(None).await.unwrap();

    let after = client.certificates();
    assert_eq!(before.generation(), 1);
    assert_eq!(after.generation(), 2);
    assert_eq!(before.serials(), after.serials());
    assert_eq!(client.rotation_state(), RotationState::Ready);
}

#[tokio::test]
async fn test_verified_call_returns_body() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    Mock::given(method("GET"))
        .and(path("/v3/merchant/fund/balance/BASIC"))
        .and(query_param("date", "2019-08-17"))
        .respond_with(signed(BALANCE, PLATFORM_A_SERIAL, &parse_private_key_pem(PLATFORM_A_KEY).unwrap()))
        .mount(&server)
        .await;

    let body = client
        .signed_call("GET", "/v3/merchant/fund/balance/BASIC", &[("date", "2019-08-17")], None, None)
        .await
        .unwrap();
    assert_eq!(body, BALANCE.as_bytes());
}

#[tokio::test]
async fn test_request_signature_verifies_with_merchant_key() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    let body = r#"{"out_order_no":"P20150806125346"}"#;
    Mock::given(method("POST"))
        .and(path("/v3/profitsharing/orders"))
        .respond_with(signed("{}", PLATFORM_A_SERIAL, &parse_private_key_pem(PLATFORM_A_KEY).unwrap()))
        .mount(&server)
        .await;

    client
        .signed_call("POST", "/v3/profitsharing/orders", &[], Some(body.as_bytes()), None)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = requests.iter().find(|r| r.url.path() == "/v3/profitsharing/orders").unwrap();
    assert_eq!(authorization_field(request, "mchid"), "1900000001");
    assert_eq!(authorization_field(request, "serial_no"), "MERCHANTSERIAL01");
    verify_request_signature(request);
    assert_eq!(request.body, body.as_bytes());
}

#[tokio::test]
async fn test_non_ascii_path_is_signed_as_sent() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    Mock::given(method("GET"))
        .and(path("/v3/refund/domestic/refunds/%E9%80%80%E6%AC%BE%201"))
        .respond_with(signed("{}", PLATFORM_A_SERIAL, &parse_private_key_pem(PLATFORM_A_KEY).unwrap()))
        .mount(&server)
        .await;

    client
        .signed_call("GET", "/v3/refund/domestic/refunds/退款 1", &[("limit", "a b")], None, None)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = requests.iter().find(|r| r.url.path().starts_with("/v3/refund/")).unwrap();
    assert_eq!(request.url.path(), "/v3/refund/domestic/refunds/%E9%80%80%E6%AC%BE%201");
    assert_eq!(request.url.query(), Some("limit=a+b"));
    verify_request_signature(request);
}

#[tokio::test]
async fn test_tampered_response_is_discarded() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    let key = parse_private_key_pem(PLATFORM_A_KEY).unwrap();
    // Headers signed for the genuine body, body swapped in transit.
    let template = signed(BALANCE, PLATFORM_A_SERIAL, &key)
        .set_body_raw(BALANCE.replace("10000", "99999"), "application/json");
    Mock::given(method("GET")).and(path("/v3/x")).respond_with(template).mount(&server).await;

    let err = client.signed_call("GET", "/v3/x", &[], None, None).await.unwrap_err();
    assert!(matches!(err, GuardError::TrustFailure(_)));
    assert!(err.is_trust_failure());
}

#[tokio::test]
async fn test_unknown_serial_is_rejected() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    let key = parse_private_key_pem(PLATFORM_A_KEY).unwrap();
    Mock::given(method("GET"))
        .and(path("/v3/x"))
        .respond_with(signed(BALANCE, "00DEADBEEF", &key))
        .mount(&server)
        .await;

    let err = client.signed_call("GET", "/v3/x", &[], None, None).await.unwrap_err();
    assert!(matches!(err, GuardError::TrustFailure(_)));
}

#[tokio::test]
async fn test_missing_signature_headers_are_rejected() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    Mock::given(method("GET"))
        .and(path("/v3/x"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(BALANCE, "application/json"))
        .mount(&server)
        .await;

    let err = client.signed_call("GET", "/v3/x", &[], None, None).await.unwrap_err();
    assert!(matches!(err, GuardError::TrustFailure(_)));
}

#[tokio::test]
async fn test_before_bootstrap_nothing_is_trusted() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let key = parse_private_key_pem(PLATFORM_A_KEY).unwrap();
    Mock::given(method("GET"))
        .and(path("/v3/x"))
        .respond_with(signed(BALANCE, PLATFORM_A_SERIAL, &key))
        .mount(&server)
        .await;

    let err = client.signed_call("GET", "/v3/x", &[], None, None).await.unwrap_err();
    assert!(matches!(err, GuardError::TrustFailure(_)));
}

#[tokio::test]
async fn test_platform_error_is_parsed() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    Mock::given(method("POST"))
        .and(path("/v3/refund/domestic/refunds"))
        .respond_with(ResponseTemplate::new(400).set_body_raw(
            r#"{"code":"PARAM_ERROR","message":"invalid out_refund_no","detail":{"field":"/out_refund_no","issue":"too long","location":"body"}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let err = client
        .signed_call("POST", "/v3/refund/domestic/refunds", &[], Some(b"{}"), None)
        .await
        .unwrap_err();
    let platform = match err {
        GuardError::Platform(platform) => platform,
        other => panic!("expected platform error, got {other:?}"),
    };
    assert_eq!(platform.status, 400);
    assert_eq!(platform.code, "PARAM_ERROR");
    assert_eq!(platform.detail.unwrap().field, "/out_refund_no");
}

#[tokio::test]
async fn test_deadline_is_enforced() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    Mock::given(method("GET"))
        .and(path("/v3/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let deadline = Instant::now() + Duration::from_millis(100);
    let err = client.signed_call("GET", "/v3/slow", &[], None, Some(deadline)).await.unwrap_err();
    assert!(matches!(err, GuardError::Timeout));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_failed_rotation_keeps_previous_certificates() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    let generation = client.certificates().generation();

    server.reset().await;
    let tampered = CERTIFICATES.replacen("\"ciphertext\": \"", "\"ciphertext\": \"AAAA", 1);
    Mock::given(method("GET"))
        .and(path("/v3/certificates"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(tampered, "application/json"))
        .mount(&server)
        .await;

    let err = client.refresh_certificates(None).await.unwrap_err();
    assert!(matches!(err, GuardError::CryptoIntegrity(_)));
    assert_eq!(client.rotation_state(), RotationState::Ready);
    assert_eq!(client.certificates().generation(), generation);
    assert_eq!(client.certificates().len(), 2);
}

#[tokio::test]
async fn test_rotation_timeout_keeps_previous_certificates() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/v3/certificates"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(CERTIFICATES, "application/json")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let deadline = Instant::now() + Duration::from_millis(100);
    let err = client.refresh_certificates(Some(deadline)).await.unwrap_err();
    assert!(matches!(err, GuardError::Timeout));
    assert_eq!(client.rotation_state(), RotationState::Ready);
    assert_eq!(client.certificates().generation(), 1);
}

#[tokio::test]
async fn test_encrypt_field_for_platform() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;

    let field = client.encrypt_field("13800138000").unwrap();
    let key = if field.serial_no == PLATFORM_A_SERIAL { PLATFORM_A_KEY } else { PLATFORM_B_KEY };
    let plaintext =
        mch_guard::cipher::decrypt_field(&field.ciphertext, &parse_private_key_pem(key).unwrap())
            .unwrap();
    assert_eq!(plaintext, "13800138000");
}

#[tokio::test]
async fn test_notification_and_resource() {
    let server = MockServer::start().await;
    let client = bootstrapped(&server).await;
    let body = r#"{"id":"EV-2018022511223320873","create_time":"2015-05-20T13:29:35+08:00","resource_type":"encrypt-resource","event_type":"TRANSACTION.SUCCESS","summary":"支付成功","resource":{"original_type":"transaction","algorithm":"AEAD_AES_256_GCM","ciphertext":"T33ZJSAItgfHg+Ytbaaq70FvLjnI1dImszZiKQAncJ0M5WtM0ooP+8ipWXOYt9GHLyhUfHZeag5MzKfBZQ4IWefqaXfmwTQptIfI9fLbqtse3gqPvY/b","associated_data":"transaction","nonce":"fd2c9a3b7e10"}}"#;
    let key = parse_private_key_pem(PLATFORM_B_KEY).unwrap();
    let headers = ResponseHeaders {
        timestamp: Some("1700000100".to_owned()),
        nonce: Some("webhooknonce".to_owned()),
        signature: Some(sign_response(&key, "1700000100", "webhooknonce", body.as_bytes())),
        serial_no: Some(PLATFORM_B_SERIAL.to_owned()),
    };

    let notification = client.notification_parser().parse(&headers, body.as_bytes()).unwrap();
    let payload: serde_json::Value = notification.decrypt_resource().unwrap();
    assert_eq!(payload["out_trade_no"], "1217752501201407033233368018");

    let resource: EncryptedResource =
        serde_json::from_value(serde_json::from_str::<serde_json::Value>(body).unwrap()["resource"].clone())
            .unwrap();
    let plaintext = client.decrypt_resource(&resource).unwrap();
    assert!(String::from_utf8(plaintext).unwrap().contains("\"trade_state\":\"SUCCESS\""));
}
