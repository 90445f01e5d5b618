use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use super::ensure_success;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{NewUser, User};

const CLERK_API_BASE: &str = "https://api.clerk.com/v1";

/// Claims of a verified session token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionClaims {
    /// Clerk user id
    pub sub: String,
    /// Authorized party (origin the token was minted for)
    #[serde(default)]
    pub azp: Option<String>,
    pub exp: i64,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a session token; any failure is `AppError::Unauthorized`
    async fn verify_session(&self, token: &str) -> Result<SessionClaims>;

    /// Profile fields used to create the local user row
    async fn fetch_profile(&self, subject: &str) -> Result<NewUser>;
}

/// Clerk-backed identity: networkless RS256 session verification plus the
/// Backend API for profile lookups
pub struct ClerkIdentity {
    decoding_key: DecodingKey,
    validation: Validation,
    authorized_parties: Vec<String>,
    secret_key: Option<String>,
    http: reqwest::Client,
}

impl ClerkIdentity {
    pub fn new(config: &Config, http: reqwest::Client) -> std::result::Result<Self, String> {
        // Keys pasted into .env files often carry literal "\n"
        let pem = config.clerk_jwt_key.replace("\\n", "\n");
        let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| format!("Invalid CLERK_JWT_KEY: {e}"))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_nbf = true;
        validation.leeway = 5;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            decoding_key,
            validation,
            authorized_parties: config.clerk_authorized_parties.clone(),
            secret_key: config.clerk_secret_key.clone(),
            http,
        })
    }
}

fn authorized_party_allowed(claims: &SessionClaims, authorized_parties: &[String]) -> bool {
    match &claims.azp {
        Some(azp) if !authorized_parties.is_empty() => authorized_parties.iter().any(|p| p == azp),
        _ => true,
    }
}

#[async_trait]
impl IdentityProvider for ClerkIdentity {
    async fn verify_session(&self, token: &str) -> Result<SessionClaims> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!("Session token rejected: {}", e);
                AppError::Unauthorized
            })?;

        if !authorized_party_allowed(&data.claims, &self.authorized_parties) {
            tracing::warn!("Session token from unauthorized party: {:?}", data.claims.azp);
            return Err(AppError::Unauthorized);
        }

        Ok(data.claims)
    }

    async fn fetch_profile(&self, subject: &str) -> Result<NewUser> {
        let Some(secret_key) = &self.secret_key else {
            // Without a Backend API key only the subject is known
            return Ok(NewUser {
                clerk_id: subject.to_string(),
                ..Default::default()
            });
        };

        let url = format!("{}/users/{}", CLERK_API_BASE, urlencoding::encode(subject));
        let response = self.http.get(&url).bearer_auth(secret_key).send().await?;
        let clerk_user: ClerkUser = ensure_success("Clerk", response).await?.json().await?;

        Ok(clerk_user.into_new_user())
    }
}

#[derive(Debug, Deserialize)]
struct ClerkEmailAddress {
    id: String,
    email_address: String,
}

/// Subset of the Clerk Backend API user object
#[derive(Debug, Deserialize)]
struct ClerkUser {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    primary_email_address_id: Option<String>,
    #[serde(default)]
    email_addresses: Vec<ClerkEmailAddress>,
}

impl ClerkUser {
    fn into_new_user(self) -> NewUser {
        let email = self
            .email_addresses
            .iter()
            .find(|e| Some(&e.id) == self.primary_email_address_id.as_ref())
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.clone());

        let display_name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let username = self
            .username
            .map(|u| u.to_lowercase())
            .filter(|u| User::validate_username(u));

        NewUser {
            clerk_id: self.id,
            email,
            username,
            display_name: (!display_name.is_empty()).then_some(display_name),
            avatar_url: self.image_url,
        }
    }
}
