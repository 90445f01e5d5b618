pub mod admin;
pub mod books;
pub mod collections;
pub mod health;
pub mod library;
pub mod profile;
pub mod reviews;
pub mod social;
pub mod subscription;
pub mod validation;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
    Router,
};
use serde::Serialize;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

use crate::constants::MAX_AVATAR_BYTES;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Build the application router: `/health`, the Stripe webhook, and the
/// versioned REST API under `/api/v1`
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Books
        .route("/books/search", get(books::search_books))
        .route("/books/:id", get(books::get_book))
        .route("/books/:id/reviews", get(books::book_reviews))
        // Library
        .route(
            "/library",
            get(library::list_library).post(library::add_to_library),
        )
        .route(
            "/library/:book_id",
            patch(library::update_library_entry).delete(library::remove_from_library),
        )
        // Reviews
        .route(
            "/reviews",
            get(reviews::list_my_reviews).put(reviews::upsert_review),
        )
        .route("/reviews/:book_id", delete(reviews::delete_review))
        .route("/feed", get(reviews::feed))
        // Social
        .route(
            "/social/follow/:user_id",
            post(social::follow_user).delete(social::unfollow_user),
        )
        .route("/social/followers", get(social::list_followers))
        .route("/social/following", get(social::list_following))
        .route("/users/:username", get(social::public_profile))
        .route(
            "/users/:username/collections",
            get(social::public_collections),
        )
        // Profile
        .route(
            "/profile",
            get(profile::get_profile)
                .patch(profile::update_profile)
                .delete(profile::delete_account),
        )
        .route(
            "/profile/avatar",
            post(profile::upload_avatar).layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES)),
        )
        // Collections
        .route(
            "/collections",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route(
            "/collections/:id",
            get(collections::get_collection)
                .patch(collections::update_collection)
                .delete(collections::delete_collection),
        )
        .route("/collections/:id/books", post(collections::add_collection_book))
        .route(
            "/collections/:id/books/:book_id",
            delete(collections::remove_collection_book),
        )
        .route(
            "/collections/:id/follow",
            post(collections::follow_collection).delete(collections::unfollow_collection),
        )
        // Subscriptions
        .route("/plans", get(subscription::list_plans))
        .route("/subscription", get(subscription::get_subscription))
        .route("/subscription/checkout", post(subscription::create_checkout))
        .route("/subscription/portal", post(subscription::create_portal))
        // Admin
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:id", delete(admin::delete_user))
        .route("/admin/users/:id/role", patch(admin::change_role))
        .route("/admin/audit-logs", get(admin::list_audit_logs))
        .route("/admin/stats", get(admin::admin_stats));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
        .nest("/api/v1", api)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
