//! AWS Signature Version 4 for the plain HTTP backend
//!
//! Supports header signing (listing, STS) and query-string presigning
//! (object downloads).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA256 of an empty payload
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SigV4 signer bound to one service and region
#[derive(Clone)]
pub struct SignerV4 {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

impl std::fmt::Debug for SignerV4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerV4")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl SignerV4 {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token,
            region: region.into(),
            service: service.into(),
        }
    }

    /// Sign a bodiless request, returning the headers to send.
    ///
    /// `url` must already be URI-encoded with its query parameters sorted.
    pub fn sign(&self, method: &str, url: &str) -> BTreeMap<String, String> {
        self.sign_at(method, url, Utc::now())
    }

    pub(crate) fn sign_at(
        &self,
        method: &str,
        url: &str,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let (host, path, query) = split_url(url);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host.to_string());
        headers.insert("x-amz-content-sha256".to_string(), EMPTY_SHA256.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        if let Some(token) = &self.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            path,
            canonical_query_string(query),
            canonical_headers,
            signed_headers,
            EMPTY_SHA256
        );
        tracing::trace!("Canonical request:\n{}", canonical_request);

        let scope = self.credential_scope(&date_stamp);
        let signature = self.signature(&date_stamp, &amz_date, &scope, &canonical_request);

        headers.insert(
            "authorization".to_string(),
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.access_key, scope, signed_headers, signature
            ),
        );
        headers
    }

    /// Build a presigned GET URL valid for `expires_secs`.
    pub fn presign_get(&self, url: &str, expires_secs: u64) -> String {
        self.presign_get_at(url, expires_secs, Utc::now())
    }

    pub(crate) fn presign_get_at(
        &self,
        url: &str,
        expires_secs: u64,
        now: DateTime<Utc>,
    ) -> String {
        let (host, path, query) = split_url(url);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = self.credential_scope(&date_stamp);

        let mut params: BTreeMap<String, String> = parse_query(query).into_iter().collect();
        params.insert("X-Amz-Algorithm".to_string(), ALGORITHM.to_string());
        params.insert(
            "X-Amz-Credential".to_string(),
            uri_encode(&format!("{}/{}", self.access_key, scope), true),
        );
        params.insert("X-Amz-Date".to_string(), amz_date.clone());
        params.insert("X-Amz-Expires".to_string(), expires_secs.to_string());
        params.insert("X-Amz-SignedHeaders".to_string(), "host".to_string());
        if let Some(token) = &self.session_token {
            params.insert("X-Amz-Security-Token".to_string(), uri_encode(token, true));
        }

        let canonical_query = join_query(&params);
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            path, canonical_query, host
        );
        let signature = self.signature(&date_stamp, &amz_date, &scope, &canonical_request);

        let base = &url[..url.find('?').unwrap_or(url.len())];
        format!("{}?{}&X-Amz-Signature={}", base, canonical_query, signature)
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/{}/aws4_request", date_stamp, self.region, self.service)
    }

    fn signature(
        &self,
        date_stamp: &str,
        amz_date: &str,
        scope: &str,
        canonical_request: &str,
    ) -> String {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signing_key = self.derive_signing_key(date_stamp);
        hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()))
    }

    /// Four chained HMACs: date, region, service, terminator
    fn derive_signing_key(&self, date_stamp: &str) -> [u8; 32] {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let mut output = [0u8; 32];
    output.copy_from_slice(&mac.finalize().into_bytes());
    output
}

/// Split a URL into (host, path, query), dropping default ports from the host
fn split_url(url: &str) -> (&str, &str, &str) {
    let (https, rest) = match url.strip_prefix("https://") {
        Some(rest) => (true, rest),
        None => (false, url.strip_prefix("http://").unwrap_or(url)),
    };

    let (authority, path_and_query) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => match rest.find('?') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, "/"),
        },
    };

    let (path, query) = match path_and_query.find('?') {
        Some(pos) => (&path_and_query[..pos], &path_and_query[pos + 1..]),
        None => (path_and_query, ""),
    };
    let path = if path.is_empty() { "/" } else { path };

    let host = if https {
        authority.strip_suffix(":443").unwrap_or(authority)
    } else {
        authority.strip_suffix(":80").unwrap_or(authority)
    };

    (host, path, query)
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn join_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sort already-encoded query parameters into canonical order
fn canonical_query_string(query: &str) -> String {
    let mut params = parse_query(query);
    params.sort();
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// URI encode a string (RFC 3986)
pub fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut result = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            b'/' if !encode_slash => result.push('/'),
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    result
}
