use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ensure_success;
use crate::config::StorageConfig;
use crate::error::Result;
use crate::security::{hmac_sha256, sha256_hex, sigv4_signing_key};

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `body` under `key` and return the public URL of the object
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String>;
}

/// S3-compatible storage using SigV4-signed PUT requests
pub struct S3Storage {
    http: reqwest::Client,
    config: StorageConfig,
}

/// Everything needed to send a signed PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPut {
    pub url: String,
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

impl S3Storage {
    pub fn new(config: StorageConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    /// Host and canonical path of `key`; path-style when a custom endpoint is set
    fn locate(&self, key: &str) -> (String, String, String) {
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        match &self.config.endpoint {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let (scheme, host) = endpoint
                    .split_once("://")
                    .unwrap_or(("https", endpoint));
                let path = format!("/{}/{}", self.config.bucket, encoded_key);
                (scheme.to_string(), host.to_string(), path)
            }
            None => {
                let host = format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                );
                ("https".to_string(), host, format!("/{encoded_key}"))
            }
        }
    }

    pub fn sign_put(&self, key: &str, body: &[u8], now: DateTime<Utc>) -> SignedPut {
        let (scheme, host, path) = self.locate(key);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let content_sha256 = sha256_hex(body);

        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_request = format!(
            "PUT\n{path}\n\nhost:{host}\nx-amz-content-sha256:{content_sha256}\nx-amz-date:{amz_date}\n\n{signed_headers}\n{content_sha256}"
        );

        let scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signing_key =
            sigv4_signing_key(&self.config.secret_access_key, &date, &self.config.region, "s3");
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        SignedPut {
            url: format!("{scheme}://{host}{path}"),
            authorization: format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.config.access_key_id, scope, signed_headers, signature
            ),
            amz_date,
            content_sha256,
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        match &self.config.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => {
                let (scheme, host, path) = self.locate(key);
                format!("{scheme}://{host}{path}")
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        let signed = self.sign_put(key, &body, Utc::now());

        let response = self
            .http
            .put(&signed.url)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await?;
        ensure_success("Object storage", response).await?;

        tracing::info!("Stored object {}", key);
        Ok(self.public_url(key))
    }
}
