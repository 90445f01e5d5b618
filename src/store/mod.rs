//! Persistence seam.
//!
//! Handlers talk to a [`Store`] trait object: [`PgStore`] in production,
//! [`MemoryStore`] in tests and local experiments.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AuditLog, Book, Collection, FeedItem, LibraryEntry, NewBook, NewUser, ProfileUpdate,
    RatingSummary, ReadingStatus, Review, ReviewDraft, ReviewWithAuthor, Role, SubscriptionPlan,
    SubscriptionUpsert, SubscriptionUsage, UsagePeriod, User, UserBook, UserSubscription,
    UserSummary,
};

/// Limit/offset window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

/// Row counts reported by the admin stats endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub user_count: i64,
    pub premium_user_count: i64,
    pub book_count: i64,
    pub library_entry_count: i64,
    pub review_count: i64,
    pub collection_count: i64,
}

/// Follower / following / finished counts shown on a profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCounts {
    pub follower_count: i64,
    pub following_count: i64,
    pub finished_count: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// Cheap connectivity check used by the health endpoint
    async fn ping(&self) -> Result<()>;

    async fn stats(&self) -> Result<StoreStats>;

    // Users

    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_user_by_clerk_id(&self, clerk_id: &str) -> Result<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_user_by_stripe_customer(&self, customer_id: &str) -> Result<Option<User>>;

    /// Insert a user, or return the existing row when the Clerk id is already known.
    /// The flag is true when a row was created.
    async fn create_user(&self, new_user: NewUser) -> Result<(User, bool)>;

    /// Apply a profile update; a taken username yields `AppError::Conflict`
    async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<User>;

    async fn set_avatar_url(&self, user_id: Uuid, avatar_url: &str) -> Result<User>;

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<User>;

    async fn link_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> Result<()>;

    /// Set the premium flag. The usage anniversary is stamped with `at` only
    /// when premium is granted and no anniversary exists yet.
    async fn set_premium(&self, user_id: Uuid, is_premium: bool, at: DateTime<Utc>) -> Result<User>;

    /// Delete a user; dependent rows cascade. Returns false when absent.
    async fn delete_user(&self, user_id: Uuid) -> Result<bool>;

    async fn list_users(&self, page: Page) -> Result<Vec<User>>;

    async fn profile_counts(&self, user_id: Uuid) -> Result<ProfileCounts>;

    // Books

    async fn find_book(&self, id: Uuid) -> Result<Option<Book>>;

    async fn search_books(&self, query: &str, limit: i64) -> Result<Vec<Book>>;

    /// Insert a catalog book, or refresh the row sharing its Open Library key
    async fn upsert_book(&self, book: NewBook) -> Result<Book>;

    async fn rating_summary(&self, book_id: Uuid) -> Result<RatingSummary>;

    // Library

    async fn find_library_entry(&self, user_id: Uuid, book_id: Uuid) -> Result<Option<UserBook>>;

    async fn list_library(
        &self,
        user_id: Uuid,
        status: Option<ReadingStatus>,
    ) -> Result<Vec<LibraryEntry>>;

    /// Insert a library entry and count it against `period` atomically.
    /// A duplicate (user, book) pair yields `AppError::Conflict`; an addition
    /// past `limit` yields `AppError::UsageLimitReached`. Neither writes anything.
    async fn add_to_library(
        &self,
        entry: UserBook,
        period: UsagePeriod,
        limit: Option<i64>,
    ) -> Result<UserBook>;

    async fn save_library_entry(&self, entry: &UserBook) -> Result<UserBook>;

    /// Remove the entry and detach the book from the user's collections
    async fn remove_from_library(&self, user_id: Uuid, book_id: Uuid) -> Result<bool>;

    // Usage & plans

    async fn usage_for_period(&self, user_id: Uuid, period: UsagePeriod)
        -> Result<SubscriptionUsage>;

    async fn find_plan(&self, plan_id: &str) -> Result<Option<SubscriptionPlan>>;

    async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>>;

    // Subscriptions

    async fn find_subscription_for_user(&self, user_id: Uuid)
        -> Result<Option<UserSubscription>>;

    async fn upsert_subscription(&self, upsert: SubscriptionUpsert) -> Result<UserSubscription>;

    // Reviews

    async fn upsert_review(&self, draft: ReviewDraft) -> Result<Review>;

    async fn delete_review(&self, user_id: Uuid, book_id: Uuid) -> Result<bool>;

    async fn list_user_reviews(&self, user_id: Uuid) -> Result<Vec<Review>>;

    /// Reviews of a book visible to `viewer`: public ones plus the viewer's own
    async fn list_book_reviews(
        &self,
        book_id: Uuid,
        viewer: Option<Uuid>,
        page: Page,
    ) -> Result<Vec<ReviewWithAuthor>>;

    /// Public reviews written by users `user_id` follows, newest first
    async fn feed(&self, user_id: Uuid, page: Page) -> Result<Vec<FeedItem>>;

    // Social

    /// Returns false when the follow already existed
    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool>;

    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool>;

    async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool>;

    async fn list_followers(&self, user_id: Uuid, page: Page) -> Result<Vec<UserSummary>>;

    async fn list_following(&self, user_id: Uuid, page: Page) -> Result<Vec<UserSummary>>;

    // Collections

    async fn create_collection(&self, collection: Collection) -> Result<Collection>;

    async fn find_collection(&self, id: Uuid) -> Result<Option<Collection>>;

    async fn list_collections(&self, user_id: Uuid, public_only: bool) -> Result<Vec<Collection>>;

    async fn save_collection(&self, collection: &Collection) -> Result<Collection>;

    async fn delete_collection(&self, id: Uuid) -> Result<bool>;

    async fn add_collection_book(&self, collection_id: Uuid, book_id: Uuid) -> Result<bool>;

    async fn remove_collection_book(&self, collection_id: Uuid, book_id: Uuid) -> Result<bool>;

    async fn list_collection_books(&self, collection_id: Uuid) -> Result<Vec<Book>>;

    async fn follow_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool>;

    async fn unfollow_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool>;

    async fn is_following_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool>;

    async fn collection_follower_count(&self, collection_id: Uuid) -> Result<i64>;

    // Audit log

    async fn append_audit_log(&self, log: AuditLog) -> Result<AuditLog>;

    async fn list_audit_logs(&self, page: Page) -> Result<Vec<AuditLog>>;
}
