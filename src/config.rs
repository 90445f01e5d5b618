use std::env;

/// S3-compatible object storage settings (avatars)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers; switches to path-style URLs
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Public base URL objects are served from (CDN), defaults to the bucket URL
    pub public_base_url: Option<String>,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub allowed_origins: Vec<String>,
    pub environment: String,
    /// Public URL of the web frontend, used for Stripe redirects and email links
    pub app_url: String,
    /// PEM-encoded public key used to verify Clerk session tokens
    pub clerk_jwt_key: String,
    pub clerk_secret_key: Option<String>,
    pub clerk_authorized_parties: Vec<String>,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_premium_price_id: String,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub storage: StorageConfig,
    pub open_library_base_url: String,
}

fn list_var(name: &str, default: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| "Invalid SERVER_PORT")?;

        let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;
        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| "Invalid DATABASE_MAX_CONNECTIONS")?;

        let allowed_origins = list_var("ALLOWED_ORIGINS", "http://localhost:3000");

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let app_url = env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let clerk_jwt_key = env::var("CLERK_JWT_KEY")
            .map_err(|_| "CLERK_JWT_KEY must be set for session verification")?;
        let clerk_secret_key = optional_var("CLERK_SECRET_KEY");
        let clerk_authorized_parties = list_var("CLERK_AUTHORIZED_PARTIES", "");

        let stripe_secret_key =
            env::var("STRIPE_SECRET_KEY").map_err(|_| "STRIPE_SECRET_KEY must be set")?;
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| "STRIPE_WEBHOOK_SECRET must be set for webhook verification")?;
        let stripe_premium_price_id = env::var("STRIPE_PREMIUM_PRICE_ID")
            .map_err(|_| "STRIPE_PREMIUM_PRICE_ID must be set")?;

        let resend_api_key = optional_var("RESEND_API_KEY");
        let email_from = env::var("EMAIL_FROM")
            .unwrap_or_else(|_| "Echo Reads <hello@echoreads.app>".to_string());

        let storage = StorageConfig {
            bucket: env::var("S3_BUCKET").map_err(|_| "S3_BUCKET must be set")?,
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: optional_var("S3_ENDPOINT"),
            access_key_id: env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| "S3_ACCESS_KEY_ID must be set")?,
            secret_access_key: env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| "S3_SECRET_ACCESS_KEY must be set")?,
            public_base_url: optional_var("S3_PUBLIC_URL"),
        };

        let open_library_base_url = env::var("OPEN_LIBRARY_BASE_URL")
            .unwrap_or_else(|_| "https://openlibrary.org".to_string());

        Ok(Config {
            server_host,
            server_port,
            database_url,
            database_max_connections,
            allowed_origins,
            environment,
            app_url,
            clerk_jwt_key,
            clerk_secret_key,
            clerk_authorized_parties,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_premium_price_id,
            resend_api_key,
            email_from,
            storage,
            open_library_base_url,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
