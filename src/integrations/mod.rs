//! Adapters for the third-party services the API depends on.
//!
//! Each concern is a trait so handlers can be exercised against fakes;
//! the concrete types talk HTTP through a shared `reqwest::Client`.

pub mod clerk;
pub mod email;
pub mod open_library;
pub mod storage;
pub mod stripe;

pub use clerk::{ClerkIdentity, IdentityProvider, SessionClaims};
pub use email::{EmailMessage, Mailer, ResendMailer};
pub use open_library::{BookCatalog, OpenLibraryCatalog};
pub use storage::{ObjectStorage, S3Storage};
pub use stripe::{BillingProvider, CheckoutRequest, StripeBilling};

use std::time::Duration;

use reqwest::ClientBuilder;

/// Build the HTTP client shared by the adapters
pub fn http_client() -> Result<reqwest::Client, String> {
    ClientBuilder::new()
        .user_agent(concat!("echo-reads/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(25))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|err| format!("Failed to create HTTP client: {err}"))
}

/// Turn a non-2xx response into `AppError::Upstream`, keeping the body for the log
pub(crate) async fn ensure_success(
    service: &str,
    response: reqwest::Response,
) -> crate::error::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(crate::error::AppError::Upstream(format!(
        "{service} returned {status}: {body}"
    )))
}

/// Encode key/value pairs as `application/x-www-form-urlencoded`
pub(crate) fn form_encode(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}
