//! Signing of outbound deliveries: HTTP Signature headers plus the signature
//! object embedded into forwarded activities.

use anyhow::{Context, Result};
use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::rsa::KeyPair;
use aws_lc_rs::signature::RSA_PKCS1_SHA256;
use base64ct::{Base64, Encoding};
use jiff::Timestamp;
use reqwest::Url;
use reqwest::header::{self, HeaderMap};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

const HTTP_DATE_FMT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const CREATED_FMT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub(crate) fn post_headers(
    actor_iri: &str,
    inbox: &str,
    body: &str,
    key_pair: &KeyPair,
) -> Result<HeaderMap> {
    let digest = base64_sha256_string(body.as_bytes());
    let url = Url::parse(inbox)?;
    let host = url
        .host()
        .context("inbox should have a host component")?
        .to_string();
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    };
    let path = url.path();
    let date = Timestamp::now().strftime(HTTP_DATE_FMT).to_string();
    let content_length = body.len();

    let sig_body = format!("(request-target): post {path}\nhost: {host}\ndate: {date}\ndigest: SHA-256={digest}\ncontent-length: {content_length}");
    let signature = Base64::encode_string(&rsa_sha256(key_pair, sig_body.as_bytes())?);

    let mut headers = HeaderMap::new();
    headers.insert(header::HOST, host.parse()?);
    headers.insert(header::DATE, date.parse()?);
    headers.insert("Digest", format!("SHA-256={digest}").parse()?);
    headers.insert(header::CONTENT_LENGTH, content_length.to_string().parse()?);
    headers.insert("Signature", format!("keyId=\"{actor_iri}#main-key\",algorithm=\"rsa-sha256\",headers=\"(request-target) host date digest content-length\",signature=\"{signature}\"").parse()?);

    Ok(headers)
}

/// Wraps `activity` with an `RsaSignature2017` object so receivers can
/// verify it even when it reaches them through a forwarder.
///
/// Both the signature options and the document are hashed in their
/// canonical JSON form: object keys sorted, no insignificant whitespace.
pub(crate) fn sign_activity(actor_iri: &str, key_pair: &KeyPair, activity: &Value) -> Result<Value> {
    let mut document = activity.clone();
    document
        .as_object_mut()
        .context("only JSON objects can be signed")?
        .remove("signature");

    let created = Timestamp::now().strftime(CREATED_FMT).to_string();
    let creator = format!("{actor_iri}#main-key");
    let options = json!({
        "@context": "https://w3id.org/identity/v1",
        "creator": creator,
        "created": created,
    });
    let to_be_signed = format!(
        "{}{}",
        hex_sha256_string(serde_json::to_string(&options)?.as_bytes()),
        hex_sha256_string(serde_json::to_string(&document)?.as_bytes()),
    );
    let signature_value = Base64::encode_string(&rsa_sha256(key_pair, to_be_signed.as_bytes())?);

    document
        .as_object_mut()
        .context("only JSON objects can be signed")?
        .insert(
            "signature".to_string(),
            json!({
                "type": "RsaSignature2017",
                "creator": creator,
                "created": created,
                "signatureValue": signature_value,
            }),
        );
    Ok(document)
}

fn rsa_sha256(key_pair: &KeyPair, message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut signature = vec![0; key_pair.public_modulus_len()];
    key_pair.sign(&RSA_PKCS1_SHA256, &rng, message, &mut signature)?;
    Ok(signature)
}

fn base64_sha256_string(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Base64::encode_string(hasher.finalize().as_slice())
}

fn hex_sha256_string(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
