//! Echo Reads API server library
//!
//! Exposes the router, state and building blocks so the binary and the
//! integration tests assemble the same application.

pub mod auth;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod extract;
pub mod integrations;
pub mod models;
pub mod routes;
pub mod security;
pub mod store;

pub use config::Config;
pub use error::{AppError, Result};
pub use routes::router;

use std::sync::Arc;

use integrations::{BillingProvider, BookCatalog, IdentityProvider, Mailer, ObjectStorage};
use store::Store;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub identity: Arc<dyn IdentityProvider>,
    pub catalog: Arc<dyn BookCatalog>,
    pub billing: Arc<dyn BillingProvider>,
    pub storage: Arc<dyn ObjectStorage>,
    pub mailer: Arc<dyn Mailer>,
}
