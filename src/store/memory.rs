use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Page, ProfileCounts, Store, StoreStats};
use crate::constants::{ERR_ALREADY_IN_LIBRARY, ERR_USERNAME_TAKEN, FREE_PLAN_ID, PREMIUM_PLAN_ID};
use crate::error::{AppError, Result};
use crate::models::{
    AuditLog, Book, Collection, FeedItem, LibraryEntry, NewBook, NewUser, PlanFeatures,
    ProfileUpdate, RatingSummary, ReadingStatus, Review, ReviewDraft, ReviewWithAuthor, Role,
    SubscriptionPlan, SubscriptionUpsert, SubscriptionUsage, UsagePeriod, User, UserBook,
    UserSubscription, UserSummary,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    books: HashMap<Uuid, Book>,
    user_books: Vec<UserBook>,
    reviews: Vec<Review>,
    /// (follower, following, created_at)
    follows: Vec<(Uuid, Uuid, DateTime<Utc>)>,
    collections: HashMap<Uuid, Collection>,
    /// (collection, book) in insertion order
    collection_books: Vec<(Uuid, Uuid)>,
    collection_follows: HashSet<(Uuid, Uuid)>,
    plans: Vec<SubscriptionPlan>,
    subscriptions: Vec<UserSubscription>,
    usage: HashMap<(Uuid, DateTime<Utc>), SubscriptionUsage>,
    audit_logs: Vec<AuditLog>,
}

impl Tables {
    /// Mirror of the foreign-key cascades in the SQL schema
    fn cascade_user(&mut self, user_id: Uuid) {
        let owned: HashSet<Uuid> = self
            .collections
            .values()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id)
            .collect();

        self.user_books.retain(|e| e.user_id != user_id);
        self.reviews.retain(|r| r.user_id != user_id);
        self.follows
            .retain(|(a, b, _)| *a != user_id && *b != user_id);
        self.collections.retain(|_, c| c.user_id != user_id);
        self.collection_books.retain(|(c, _)| !owned.contains(c));
        self.collection_follows
            .retain(|(u, c)| *u != user_id && !owned.contains(c));
        self.subscriptions.retain(|s| s.user_id != user_id);
        self.usage.retain(|(u, _), _| *u != user_id);
        for log in &mut self.audit_logs {
            if log.actor_id == Some(user_id) {
                log.actor_id = None;
            }
            if log.target_user_id == Some(user_id) {
                log.target_user_id = None;
            }
        }
    }

    fn summary(&self, user_id: Uuid) -> UserSummary {
        self.users
            .get(&user_id)
            .map(User::summary)
            .unwrap_or(UserSummary {
                id: user_id,
                username: None,
                display_name: None,
                avatar_url: None,
            })
    }

    fn user_mut(&mut self, user_id: Uuid) -> Result<&mut User> {
        self.users
            .get_mut(&user_id)
            .ok_or(AppError::NotFound("User"))
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect()
}

/// In-memory store with the same semantics as [`super::PgStore`], seeded with
/// the default plans. Used by the test suite.
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let tables = Tables {
            plans: vec![
                SubscriptionPlan {
                    id: FREE_PLAN_ID.to_string(),
                    name: "Free".to_string(),
                    stripe_price_id: None,
                    features: Json(PlanFeatures {
                        max_books_per_year: Some(100),
                        collections: false,
                    }),
                },
                SubscriptionPlan {
                    id: PREMIUM_PLAN_ID.to_string(),
                    name: "Premium".to_string(),
                    stripe_price_id: None,
                    features: Json(PlanFeatures {
                        max_books_per_year: None,
                        collections: true,
                    }),
                },
            ],
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the feature flags of a plan (tests use small limits)
    pub async fn set_plan_features(&self, plan_id: &str, features: PlanFeatures) {
        let mut tables = self.tables.lock().await;
        if let Some(plan) = tables.plans.iter_mut().find(|p| p.id == plan_id) {
            plan.features = Json(features);
        }
    }

    /// Insert a catalog book directly
    pub async fn insert_book(&self, book: Book) {
        self.tables.lock().await.books.insert(book.id, book);
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let tables = self.tables.lock().await;
        Ok(StoreStats {
            user_count: tables.users.len() as i64,
            premium_user_count: tables.users.values().filter(|u| u.is_premium).count() as i64,
            book_count: tables.books.len() as i64,
            library_entry_count: tables.user_books.len() as i64,
            review_count: tables.reviews.len() as i64,
            collection_count: tables.collections.len() as i64,
        })
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_clerk_id(&self, clerk_id: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.clerk_id == clerk_id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username.as_deref() == Some(username))
            .cloned())
    }

    async fn find_user_by_stripe_customer(&self, customer_id: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<(User, bool)> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.users.values().find(|u| u.clerk_id == new_user.clerk_id) {
            return Ok((existing.clone(), false));
        }
        if let Some(username) = &new_user.username {
            if tables
                .users
                .values()
                .any(|u| u.username.as_ref() == Some(username))
            {
                return Err(AppError::Conflict(ERR_USERNAME_TAKEN.to_string()));
            }
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            clerk_id: new_user.clerk_id,
            email: new_user.email,
            username: new_user.username,
            display_name: new_user.display_name,
            bio: None,
            avatar_url: new_user.avatar_url,
            role: Role::User,
            is_premium: false,
            stripe_customer_id: None,
            subscription_anniversary: None,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok((user, true))
    }

    async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<User> {
        let mut tables = self.tables.lock().await;
        if let Some(username) = &update.username {
            if tables
                .users
                .values()
                .any(|u| u.id != user_id && u.username.as_ref() == Some(username))
            {
                return Err(AppError::Conflict(ERR_USERNAME_TAKEN.to_string()));
            }
        }

        let user = tables.user_mut(user_id)?;
        if update.username.is_some() {
            user.username = update.username;
        }
        if update.display_name.is_some() {
            user.display_name = update.display_name;
        }
        if update.bio.is_some() {
            user.bio = update.bio;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_avatar_url(&self, user_id: Uuid, avatar_url: &str) -> Result<User> {
        let mut tables = self.tables.lock().await;
        let user = tables.user_mut(user_id)?;
        user.avatar_url = Some(avatar_url.to_string());
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<User> {
        let mut tables = self.tables.lock().await;
        let user = tables.user_mut(user_id)?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn link_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .users
            .values()
            .any(|u| u.id != user_id && u.stripe_customer_id.as_deref() == Some(customer_id))
        {
            return Err(AppError::Conflict("Stripe customer already linked".to_string()));
        }
        let user = tables.user_mut(user_id)?;
        user.stripe_customer_id = Some(customer_id.to_string());
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_premium(&self, user_id: Uuid, is_premium: bool, at: DateTime<Utc>) -> Result<User> {
        let mut tables = self.tables.lock().await;
        let user = tables.user_mut(user_id)?;
        user.is_premium = is_premium;
        if is_premium && user.subscription_anniversary.is_none() {
            user.subscription_anniversary = Some(at);
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.users.remove(&user_id).is_none() {
            return Ok(false);
        }
        tables.cascade_user(user_id);
        Ok(true)
    }

    async fn list_users(&self, page: Page) -> Result<Vec<User>> {
        let tables = self.tables.lock().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(users, page))
    }

    async fn profile_counts(&self, user_id: Uuid) -> Result<ProfileCounts> {
        let tables = self.tables.lock().await;
        Ok(ProfileCounts {
            follower_count: tables.follows.iter().filter(|f| f.1 == user_id).count() as i64,
            following_count: tables.follows.iter().filter(|f| f.0 == user_id).count() as i64,
            finished_count: tables
                .user_books
                .iter()
                .filter(|e| e.user_id == user_id && e.status == ReadingStatus::Finished)
                .count() as i64,
        })
    }

    async fn find_book(&self, id: Uuid) -> Result<Option<Book>> {
        Ok(self.tables.lock().await.books.get(&id).cloned())
    }

    async fn search_books(&self, query: &str, limit: i64) -> Result<Vec<Book>> {
        let tables = self.tables.lock().await;
        let mut books: Vec<Book> = tables
            .books
            .values()
            .filter(|b| b.matches_query(query))
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title));
        books.truncate(limit.max(0) as usize);
        Ok(books)
    }

    async fn upsert_book(&self, new_book: NewBook) -> Result<Book> {
        let mut tables = self.tables.lock().await;

        let existing_id = new_book.open_library_key.as_ref().and_then(|key| {
            tables
                .books
                .values()
                .find(|b| b.open_library_key.as_ref() == Some(key))
                .map(|b| b.id)
        });
        if let Some(book) = existing_id.and_then(|id| tables.books.get_mut(&id)) {
            book.title = new_book.title;
            book.author = new_book.author;
            book.isbn = new_book.isbn.or(book.isbn.take());
            book.cover_url = new_book.cover_url.or(book.cover_url.take());
            book.description = new_book.description.or(book.description.take());
            book.published_year = new_book.published_year.or(book.published_year);
            book.page_count = new_book.page_count.or(book.page_count);
            return Ok(book.clone());
        }

        let book = Book {
            id: Uuid::new_v4(),
            open_library_key: new_book.open_library_key,
            title: new_book.title,
            author: new_book.author,
            isbn: new_book.isbn,
            cover_url: new_book.cover_url,
            description: new_book.description,
            published_year: new_book.published_year,
            page_count: new_book.page_count,
            created_at: Utc::now(),
        };
        tables.books.insert(book.id, book.clone());
        Ok(book)
    }

    async fn rating_summary(&self, book_id: Uuid) -> Result<RatingSummary> {
        let tables = self.tables.lock().await;
        let ratings: Vec<f64> = tables
            .reviews
            .iter()
            .filter(|r| r.book_id == book_id && !r.is_private)
            .map(|r| f64::from(r.rating))
            .collect();

        let review_count = ratings.len() as i64;
        let average_rating = if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        };
        Ok(RatingSummary {
            average_rating,
            review_count,
        })
    }

    async fn find_library_entry(&self, user_id: Uuid, book_id: Uuid) -> Result<Option<UserBook>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .user_books
            .iter()
            .find(|e| e.user_id == user_id && e.book_id == book_id)
            .cloned())
    }

    async fn list_library(
        &self,
        user_id: Uuid,
        status: Option<ReadingStatus>,
    ) -> Result<Vec<LibraryEntry>> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<LibraryEntry> = tables
            .user_books
            .iter()
            .filter(|e| e.user_id == user_id && status.map_or(true, |s| e.status == s))
            .filter_map(|e| {
                tables.books.get(&e.book_id).map(|book| LibraryEntry {
                    entry: e.clone(),
                    book: book.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| b.entry.updated_at.cmp(&a.entry.updated_at));
        Ok(entries)
    }

    async fn add_to_library(
        &self,
        entry: UserBook,
        period: UsagePeriod,
        limit: Option<i64>,
    ) -> Result<UserBook> {
        let mut tables = self.tables.lock().await;
        if tables
            .user_books
            .iter()
            .any(|e| e.user_id == entry.user_id && e.book_id == entry.book_id)
        {
            return Err(AppError::Conflict(ERR_ALREADY_IN_LIBRARY.to_string()));
        }

        let usage = tables
            .usage
            .entry((entry.user_id, period.start))
            .or_insert_with(|| SubscriptionUsage::empty(entry.user_id, period));
        if let Some(max) = limit {
            if !usage.allows_addition(limit) {
                return Err(AppError::UsageLimitReached {
                    books_added: usage.books_added,
                    limit: max,
                });
            }
        }
        usage.books_added += 1;

        tables.user_books.push(entry.clone());
        Ok(entry)
    }

    async fn save_library_entry(&self, entry: &UserBook) -> Result<UserBook> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .user_books
            .iter_mut()
            .find(|e| e.user_id == entry.user_id && e.book_id == entry.book_id)
            .ok_or(AppError::NotFound("Library entry"))?;
        stored.status = entry.status;
        stored.current_page = entry.current_page;
        stored.started_at = entry.started_at;
        stored.finished_at = entry.finished_at;
        stored.updated_at = entry.updated_at;
        Ok(stored.clone())
    }

    async fn remove_from_library(&self, user_id: Uuid, book_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let owned: HashSet<Uuid> = tables
            .collections
            .values()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id)
            .collect();
        tables
            .collection_books
            .retain(|(c, b)| !(owned.contains(c) && *b == book_id));

        let before = tables.user_books.len();
        tables
            .user_books
            .retain(|e| !(e.user_id == user_id && e.book_id == book_id));
        Ok(tables.user_books.len() < before)
    }

    async fn usage_for_period(
        &self,
        user_id: Uuid,
        period: UsagePeriod,
    ) -> Result<SubscriptionUsage> {
        let tables = self.tables.lock().await;
        Ok(tables
            .usage
            .get(&(user_id, period.start))
            .cloned()
            .unwrap_or_else(|| SubscriptionUsage::empty(user_id, period)))
    }

    async fn find_plan(&self, plan_id: &str) -> Result<Option<SubscriptionPlan>> {
        let tables = self.tables.lock().await;
        Ok(tables.plans.iter().find(|p| p.id == plan_id).cloned())
    }

    async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>> {
        Ok(self.tables.lock().await.plans.clone())
    }

    async fn find_subscription_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.updated_at)
            .cloned())
    }

    async fn upsert_subscription(&self, upsert: SubscriptionUpsert) -> Result<UserSubscription> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        if let Some(existing) = tables
            .subscriptions
            .iter_mut()
            .find(|s| s.stripe_subscription_id == upsert.stripe_subscription_id)
        {
            existing.plan_id = upsert.plan_id;
            existing.status = upsert.status;
            existing.current_period_start =
                upsert.current_period_start.or(existing.current_period_start);
            existing.current_period_end = upsert.current_period_end.or(existing.current_period_end);
            existing.cancel_at_period_end = upsert.cancel_at_period_end;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let subscription = UserSubscription {
            id: Uuid::new_v4(),
            user_id: upsert.user_id,
            plan_id: upsert.plan_id,
            stripe_subscription_id: upsert.stripe_subscription_id,
            status: upsert.status,
            current_period_start: upsert.current_period_start,
            current_period_end: upsert.current_period_end,
            cancel_at_period_end: upsert.cancel_at_period_end,
            created_at: now,
            updated_at: now,
        };
        tables.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn upsert_review(&self, draft: ReviewDraft) -> Result<Review> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        if let Some(existing) = tables
            .reviews
            .iter_mut()
            .find(|r| r.user_id == draft.user_id && r.book_id == draft.book_id)
        {
            existing.rating = draft.rating;
            existing.content = draft.content;
            existing.is_private = draft.is_private;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let review = Review {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            book_id: draft.book_id,
            rating: draft.rating,
            content: draft.content,
            is_private: draft.is_private,
            created_at: now,
            updated_at: now,
        };
        tables.reviews.push(review.clone());
        Ok(review)
    }

    async fn delete_review(&self, user_id: Uuid, book_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.reviews.len();
        tables
            .reviews
            .retain(|r| !(r.user_id == user_id && r.book_id == book_id));
        Ok(tables.reviews.len() < before)
    }

    async fn list_user_reviews(&self, user_id: Uuid) -> Result<Vec<Review>> {
        let tables = self.tables.lock().await;
        let mut reviews: Vec<Review> = tables
            .reviews
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(reviews)
    }

    async fn list_book_reviews(
        &self,
        book_id: Uuid,
        viewer: Option<Uuid>,
        page: Page,
    ) -> Result<Vec<ReviewWithAuthor>> {
        let tables = self.tables.lock().await;
        let mut reviews: Vec<ReviewWithAuthor> = tables
            .reviews
            .iter()
            .filter(|r| r.book_id == book_id && r.visible_to(viewer))
            .map(|r| ReviewWithAuthor {
                review: r.clone(),
                author: tables.summary(r.user_id),
            })
            .collect();
        reviews.sort_by(|a, b| b.review.created_at.cmp(&a.review.created_at));
        Ok(paginate(reviews, page))
    }

    async fn feed(&self, user_id: Uuid, page: Page) -> Result<Vec<FeedItem>> {
        let tables = self.tables.lock().await;
        let following: HashSet<Uuid> = tables
            .follows
            .iter()
            .filter(|f| f.0 == user_id)
            .map(|f| f.1)
            .collect();

        let mut items: Vec<FeedItem> = tables
            .reviews
            .iter()
            .filter(|r| !r.is_private && following.contains(&r.user_id))
            .filter_map(|r| {
                tables.books.get(&r.book_id).map(|book| FeedItem {
                    review: r.clone(),
                    author: tables.summary(r.user_id),
                    book_title: book.title.clone(),
                    book_author: book.author.clone(),
                    book_cover_url: book.cover_url.clone(),
                })
            })
            .collect();
        items.sort_by(|a, b| b.review.created_at.cmp(&a.review.created_at));
        Ok(paginate(items, page))
    }

    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables
            .follows
            .iter()
            .any(|f| f.0 == follower_id && f.1 == following_id)
        {
            return Ok(false);
        }
        tables.follows.push((follower_id, following_id, Utc::now()));
        Ok(true)
    }

    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.follows.len();
        tables
            .follows
            .retain(|f| !(f.0 == follower_id && f.1 == following_id));
        Ok(tables.follows.len() < before)
    }

    async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .follows
            .iter()
            .any(|f| f.0 == follower_id && f.1 == following_id))
    }

    async fn list_followers(&self, user_id: Uuid, page: Page) -> Result<Vec<UserSummary>> {
        let tables = self.tables.lock().await;
        let followers: Vec<UserSummary> = tables
            .follows
            .iter()
            .rev()
            .filter(|f| f.1 == user_id)
            .map(|f| tables.summary(f.0))
            .collect();
        Ok(paginate(followers, page))
    }

    async fn list_following(&self, user_id: Uuid, page: Page) -> Result<Vec<UserSummary>> {
        let tables = self.tables.lock().await;
        let following: Vec<UserSummary> = tables
            .follows
            .iter()
            .rev()
            .filter(|f| f.0 == user_id)
            .map(|f| tables.summary(f.1))
            .collect();
        Ok(paginate(following, page))
    }

    async fn create_collection(&self, collection: Collection) -> Result<Collection> {
        let mut tables = self.tables.lock().await;
        tables.collections.insert(collection.id, collection.clone());
        Ok(collection)
    }

    async fn find_collection(&self, id: Uuid) -> Result<Option<Collection>> {
        Ok(self.tables.lock().await.collections.get(&id).cloned())
    }

    async fn list_collections(&self, user_id: Uuid, public_only: bool) -> Result<Vec<Collection>> {
        let tables = self.tables.lock().await;
        let mut collections: Vec<Collection> = tables
            .collections
            .values()
            .filter(|c| c.user_id == user_id && (c.is_public || !public_only))
            .cloned()
            .collect();
        collections.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(collections)
    }

    async fn save_collection(&self, collection: &Collection) -> Result<Collection> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .collections
            .get_mut(&collection.id)
            .ok_or(AppError::NotFound("Collection"))?;
        stored.name = collection.name.clone();
        stored.description = collection.description.clone();
        stored.is_public = collection.is_public;
        stored.updated_at = collection.updated_at;
        Ok(stored.clone())
    }

    async fn delete_collection(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.collections.remove(&id).is_none() {
            return Ok(false);
        }
        tables.collection_books.retain(|(c, _)| *c != id);
        tables.collection_follows.retain(|(_, c)| *c != id);
        Ok(true)
    }

    async fn add_collection_book(&self, collection_id: Uuid, book_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.collection_books.contains(&(collection_id, book_id)) {
            return Ok(false);
        }
        tables.collection_books.push((collection_id, book_id));
        Ok(true)
    }

    async fn remove_collection_book(&self, collection_id: Uuid, book_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.collection_books.len();
        tables
            .collection_books
            .retain(|pair| *pair != (collection_id, book_id));
        Ok(tables.collection_books.len() < before)
    }

    async fn list_collection_books(&self, collection_id: Uuid) -> Result<Vec<Book>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .collection_books
            .iter()
            .filter(|(c, _)| *c == collection_id)
            .filter_map(|(_, b)| tables.books.get(b).cloned())
            .collect())
    }

    async fn follow_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables.collection_follows.insert((user_id, collection_id)))
    }

    async fn unfollow_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables.collection_follows.remove(&(user_id, collection_id)))
    }

    async fn is_following_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.collection_follows.contains(&(user_id, collection_id)))
    }

    async fn collection_follower_count(&self, collection_id: Uuid) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .collection_follows
            .iter()
            .filter(|(_, c)| *c == collection_id)
            .count() as i64)
    }

    async fn append_audit_log(&self, log: AuditLog) -> Result<AuditLog> {
        let mut tables = self.tables.lock().await;
        tables.audit_logs.push(log.clone());
        Ok(log)
    }

    async fn list_audit_logs(&self, page: Page) -> Result<Vec<AuditLog>> {
        let tables = self.tables.lock().await;
        let logs: Vec<AuditLog> = tables.audit_logs.iter().rev().cloned().collect();
        Ok(paginate(logs, page))
    }
}
