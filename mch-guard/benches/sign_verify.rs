//! Sign and verify throughput at RSA-2048.
//!
//! Run with: `cargo bench --bench sign_verify`

#![allow(clippy::let_underscore_must_use, reason = "Criterion benchmarks ignore results")]
#![allow(missing_docs, reason = "Benchmark functions are self-documenting")]

use std::{hint::black_box, sync::Arc};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mch_guard::{
    auth::{RequestSigner, ResponseVerifier, sign},
    certs::{CertificateStore, PlatformCertificate},
    cipher::{ApiV3Key, decrypt_gcm, encrypt_gcm, encrypt_field},
    credential::{Credential, parse_private_key_pem},
};

const MERCHANT_KEY: &str = include_str!("../tests/fixtures/merchant_key.pem");
const PLATFORM_A_KEY: &str = include_str!("../tests/fixtures/platform_a_key.pem");
const PLATFORM_A_CERT: &str = include_str!("../tests/fixtures/platform_a_cert.pem");
const PLATFORM_A_SERIAL: &str = "3C8F1A2B4D6E7F8091A2B3C4D5E6F708192A3B4C";

fn bench_authorize(c: &mut Criterion) {
    let credential = Credential::from_pem("1900000001", "MERCHANTSERIAL01", MERCHANT_KEY).unwrap();
    let signer = RequestSigner::new(credential);
    let body = br#"{"transaction_id":"4208450740201411110007820472","out_order_no":"P20150806125346"}"#;

    c.bench_function("authorize_post", |b| {
        b.iter(|| signer.authorize(black_box("POST"), black_box("/v3/profitsharing/orders"), Some(black_box(body))));
    });
}

fn bench_verify(c: &mut Criterion) {
    let store = CertificateStore::new();
    store.replace_all(vec![PlatformCertificate::from_pem(PLATFORM_A_CERT).unwrap()]).unwrap();
    let verifier = ResponseVerifier::new(Arc::new(store));
    let platform_key = parse_private_key_pem(PLATFORM_A_KEY).unwrap();

    let mut group = c.benchmark_group("verify_response");
    for size in [64_usize, 1024, 16 * 1024] {
        let body = vec![b'x'; size];
        let mut message = b"1700000000\nbenchnonce\n".to_vec();
        message.extend_from_slice(&body);
        message.push(b'\n');
        let signature = sign_inbound(&platform_key, &message);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| {
                verifier.verify(
                    black_box("1700000000"),
                    black_box("benchnonce"),
                    black_box(body),
                    black_box(PLATFORM_A_SERIAL),
                    black_box(&signature),
                )
            });
        });
    }
    group.finish();
}

fn sign_inbound(key: &rsa::RsaPrivateKey, message: &[u8]) -> String {
    use base64::Engine;
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(message);
    let signature = key.sign(rsa::Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();
    base64::engine::general_purpose::STANDARD.encode(signature)
}

fn bench_free_sign(c: &mut Criterion) {
    let key = parse_private_key_pem(MERCHANT_KEY).unwrap();
    c.bench_function("sign_get_certificates", |b| {
        b.iter(|| sign("GET", "/v3/certificates", 1_700_000_000, "abc12345xy", None, black_box(&key)));
    });
}

fn bench_ciphers(c: &mut Criterion) {
    let key = ApiV3Key::new("0123456789abcdef0123456789ABCDEF").unwrap();
    let plaintext = vec![b'c'; 1500];
    let ciphertext = encrypt_gcm(&plaintext, "certificate", "4f1c2b3a9d8e", &key).unwrap();
    c.bench_function("decrypt_gcm_1500", |b| {
        b.iter(|| decrypt_gcm("certificate", "4f1c2b3a9d8e", black_box(&ciphertext), &key));
    });

    let platform = PlatformCertificate::from_pem(PLATFORM_A_CERT).unwrap();
    c.bench_function("encrypt_field_oaep", |b| {
        b.iter(|| encrypt_field(black_box("13800138000"), platform.public_key()));
    });
}

criterion_group!(benches, bench_authorize, bench_verify, bench_free_sign, bench_ciphers);
criterion_main!(benches);
