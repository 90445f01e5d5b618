use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Page, ProfileCounts, Store, StoreStats};
use crate::constants::{ERR_ALREADY_IN_LIBRARY, ERR_USERNAME_TAKEN};
use crate::error::{AppError, Result};
use crate::models::{
    AuditLog, Book, Collection, FeedItem, LibraryEntry, NewBook, NewUser, ProfileUpdate,
    RatingSummary, ReadingStatus, Review, ReviewDraft, ReviewWithAuthor, Role, SubscriptionPlan,
    SubscriptionUpsert, SubscriptionUsage, UsagePeriod, User, UserBook, UserSubscription,
    UserSummary,
};

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Review row joined with its author columns
#[derive(sqlx::FromRow)]
struct ReviewAuthorRow {
    #[sqlx(flatten)]
    review: Review,
    author_username: Option<String>,
    author_display_name: Option<String>,
    author_avatar_url: Option<String>,
}

impl ReviewAuthorRow {
    fn author(&self) -> UserSummary {
        UserSummary {
            id: self.review.user_id,
            username: self.author_username.clone(),
            display_name: self.author_display_name.clone(),
            avatar_url: self.author_avatar_url.clone(),
        }
    }
}

/// Feed row: review, author and book summary
#[derive(sqlx::FromRow)]
struct FeedRow {
    #[sqlx(flatten)]
    inner: ReviewAuthorRow,
    book_title: String,
    book_author: String,
    book_cover_url: Option<String>,
}

/// Escape LIKE wildcards and wrap the query for a substring match
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl Store for PgStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let stats = sqlx::query_as::<_, StoreStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS user_count,
                (SELECT COUNT(*) FROM users WHERE is_premium) AS premium_user_count,
                (SELECT COUNT(*) FROM books) AS book_count,
                (SELECT COUNT(*) FROM user_books) AS library_entry_count,
                (SELECT COUNT(*) FROM reviews) AS review_count,
                (SELECT COUNT(*) FROM collections) AS collection_count
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_clerk_id(&self, clerk_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE clerk_id = $1")
            .bind(clerk_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_stripe_customer(&self, customer_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE stripe_customer_id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<(User, bool)> {
        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, clerk_id, email, username, display_name, avatar_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (clerk_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_user.clerk_id)
        .bind(&new_user.email)
        .bind(&new_user.username)
        .bind(&new_user.display_name)
        .bind(&new_user.avatar_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, ERR_USERNAME_TAKEN))?;

        if let Some(user) = inserted {
            return Ok((user, true));
        }

        // Lost a race against a concurrent first request for the same identity
        let existing = self
            .find_user_by_clerk_id(&new_user.clerk_id)
            .await?
            .ok_or(AppError::NotFound("User"))?;
        Ok((existing, false))
    }

    async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                display_name = COALESCE($3, display_name),
                bio = COALESCE($4, bio),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&update.username)
        .bind(&update.display_name)
        .bind(&update.bio)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, ERR_USERNAME_TAKEN))?
        .ok_or(AppError::NotFound("User"))
    }

    async fn set_avatar_url(&self, user_id: Uuid, avatar_url: &str) -> Result<User> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET avatar_url = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(avatar_url)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("User"))
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<User> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("User"))
    }

    async fn link_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "Stripe customer already linked"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User"));
        }
        Ok(())
    }

    async fn set_premium(&self, user_id: Uuid, is_premium: bool, at: DateTime<Utc>) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_premium = $2,
                subscription_anniversary = CASE
                    WHEN $2 AND subscription_anniversary IS NULL THEN $3
                    ELSE subscription_anniversary
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(is_premium)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("User"))
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self, page: Page) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn profile_counts(&self, user_id: Uuid) -> Result<ProfileCounts> {
        let counts = sqlx::query_as::<_, ProfileCounts>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM follows WHERE following_id = $1) AS follower_count,
                (SELECT COUNT(*) FROM follows WHERE follower_id = $1) AS following_count,
                (SELECT COUNT(*) FROM user_books
                    WHERE user_id = $1 AND status = 'finished') AS finished_count
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn find_book(&self, id: Uuid) -> Result<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    async fn search_books(&self, query: &str, limit: i64) -> Result<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT * FROM books
            WHERE title ILIKE $1 OR author ILIKE $1 OR isbn = $2
            ORDER BY title
            LIMIT $3
            "#,
        )
        .bind(like_pattern(query))
        .bind(query.trim())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    async fn upsert_book(&self, book: NewBook) -> Result<Book> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (
                id, open_library_key, title, author, isbn, cover_url,
                description, published_year, page_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (open_library_key) DO UPDATE SET
                title = EXCLUDED.title,
                author = EXCLUDED.author,
                isbn = COALESCE(EXCLUDED.isbn, books.isbn),
                cover_url = COALESCE(EXCLUDED.cover_url, books.cover_url),
                description = COALESCE(EXCLUDED.description, books.description),
                published_year = COALESCE(EXCLUDED.published_year, books.published_year),
                page_count = COALESCE(EXCLUDED.page_count, books.page_count)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&book.open_library_key)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.cover_url)
        .bind(&book.description)
        .bind(book.published_year)
        .bind(book.page_count)
        .fetch_one(&self.pool)
        .await?;
        Ok(book)
    }

    async fn rating_summary(&self, book_id: Uuid) -> Result<RatingSummary> {
        let summary = sqlx::query_as::<_, RatingSummary>(
            r#"
            SELECT AVG(rating)::FLOAT8 AS average_rating, COUNT(*) AS review_count
            FROM reviews
            WHERE book_id = $1 AND NOT is_private
            "#,
        )
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(summary)
    }

    async fn find_library_entry(&self, user_id: Uuid, book_id: Uuid) -> Result<Option<UserBook>> {
        let entry = sqlx::query_as::<_, UserBook>(
            "SELECT * FROM user_books WHERE user_id = $1 AND book_id = $2",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn list_library(
        &self,
        user_id: Uuid,
        status: Option<ReadingStatus>,
    ) -> Result<Vec<LibraryEntry>> {
        let entries = sqlx::query_as::<_, UserBook>(
            r#"
            SELECT * FROM user_books
            WHERE user_id = $1 AND ($2::reading_status IS NULL OR status = $2)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        let book_ids: Vec<Uuid> = entries.iter().map(|e| e.book_id).collect();
        let mut books: HashMap<Uuid, Book> =
            sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ANY($1)")
                .bind(&book_ids)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|b| (b.id, b))
                .collect();

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                books
                    .remove(&entry.book_id)
                    .map(|book| LibraryEntry { entry, book })
            })
            .collect())
    }

    async fn add_to_library(
        &self,
        entry: UserBook,
        period: UsagePeriod,
        limit: Option<i64>,
    ) -> Result<UserBook> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_books WHERE user_id = $1 AND book_id = $2)",
        )
        .bind(entry.user_id)
        .bind(entry.book_id)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Err(AppError::Conflict(ERR_ALREADY_IN_LIBRARY.to_string()));
        }

        // Locks the usage row; concurrent additions for the period queue here
        let books_added: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO subscription_usage (user_id, period_start, period_end, books_added)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (user_id, period_start)
            DO UPDATE SET books_added = subscription_usage.books_added + 1
            WHERE $4::BIGINT IS NULL OR subscription_usage.books_added < $4
            RETURNING books_added
            "#,
        )
        .bind(entry.user_id)
        .bind(period.start)
        .bind(period.end)
        .bind(limit)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(max) = limit {
            match books_added {
                Some(count) if i64::from(count) <= max => {}
                _ => {
                    tx.rollback().await?;
                    return Err(AppError::UsageLimitReached {
                        books_added: i32::try_from(max).unwrap_or(i32::MAX),
                        limit: max,
                    });
                }
            }
        }

        let inserted = sqlx::query_as::<_, UserBook>(
            r#"
            INSERT INTO user_books (
                id, user_id, book_id, status, current_page,
                started_at, finished_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.book_id)
        .bind(entry.status)
        .bind(entry.current_page)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, ERR_ALREADY_IN_LIBRARY))?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn save_library_entry(&self, entry: &UserBook) -> Result<UserBook> {
        sqlx::query_as::<_, UserBook>(
            r#"
            UPDATE user_books
            SET status = $3, current_page = $4, started_at = $5, finished_at = $6, updated_at = $7
            WHERE user_id = $1 AND book_id = $2
            RETURNING *
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.book_id)
        .bind(entry.status)
        .bind(entry.current_page)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(entry.updated_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Library entry"))
    }

    async fn remove_from_library(&self, user_id: Uuid, book_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM collection_books
            WHERE book_id = $2
              AND collection_id IN (SELECT id FROM collections WHERE user_id = $1)
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM user_books WHERE user_id = $1 AND book_id = $2")
            .bind(user_id)
            .bind(book_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn usage_for_period(
        &self,
        user_id: Uuid,
        period: UsagePeriod,
    ) -> Result<SubscriptionUsage> {
        let usage = sqlx::query_as::<_, SubscriptionUsage>(
            "SELECT * FROM subscription_usage WHERE user_id = $1 AND period_start = $2",
        )
        .bind(user_id)
        .bind(period.start)
        .fetch_optional(&self.pool)
        .await?;
        Ok(usage.unwrap_or_else(|| SubscriptionUsage::empty(user_id, period)))
    }

    async fn find_plan(&self, plan_id: &str) -> Result<Option<SubscriptionPlan>> {
        let plan =
            sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(plan)
    }

    async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>> {
        let plans =
            sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(plans)
    }

    async fn find_subscription_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>> {
        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            SELECT * FROM user_subscriptions
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }

    async fn upsert_subscription(&self, upsert: SubscriptionUpsert) -> Result<UserSubscription> {
        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            INSERT INTO user_subscriptions (
                id, user_id, plan_id, stripe_subscription_id, status,
                current_period_start, current_period_end, cancel_at_period_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                status = EXCLUDED.status,
                current_period_start = COALESCE(
                    EXCLUDED.current_period_start, user_subscriptions.current_period_start),
                current_period_end = COALESCE(
                    EXCLUDED.current_period_end, user_subscriptions.current_period_end),
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(upsert.user_id)
        .bind(&upsert.plan_id)
        .bind(&upsert.stripe_subscription_id)
        .bind(upsert.status)
        .bind(upsert.current_period_start)
        .bind(upsert.current_period_end)
        .bind(upsert.cancel_at_period_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(subscription)
    }

    async fn upsert_review(&self, draft: ReviewDraft) -> Result<Review> {
        let review = sqlx::query_as::<_, Review>(
            r#"
            INSERT INTO reviews (id, user_id, book_id, rating, content, is_private)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, book_id) DO UPDATE SET
                rating = EXCLUDED.rating,
                content = EXCLUDED.content,
                is_private = EXCLUDED.is_private,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(draft.user_id)
        .bind(draft.book_id)
        .bind(draft.rating)
        .bind(&draft.content)
        .bind(draft.is_private)
        .fetch_one(&self.pool)
        .await?;
        Ok(review)
    }

    async fn delete_review(&self, user_id: Uuid, book_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reviews WHERE user_id = $1 AND book_id = $2")
            .bind(user_id)
            .bind(book_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_reviews(&self, user_id: Uuid) -> Result<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(
            "SELECT * FROM reviews WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    async fn list_book_reviews(
        &self,
        book_id: Uuid,
        viewer: Option<Uuid>,
        page: Page,
    ) -> Result<Vec<ReviewWithAuthor>> {
        let rows = sqlx::query_as::<_, ReviewAuthorRow>(
            r#"
            SELECT r.*,
                   u.username AS author_username,
                   u.display_name AS author_display_name,
                   u.avatar_url AS author_avatar_url
            FROM reviews r
            JOIN users u ON u.id = r.user_id
            WHERE r.book_id = $1 AND (NOT r.is_private OR r.user_id = $2)
            ORDER BY r.created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(book_id)
        .bind(viewer)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ReviewWithAuthor {
                author: row.author(),
                review: row.review,
            })
            .collect())
    }

    async fn feed(&self, user_id: Uuid, page: Page) -> Result<Vec<FeedItem>> {
        let rows = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT r.*,
                   u.username AS author_username,
                   u.display_name AS author_display_name,
                   u.avatar_url AS author_avatar_url,
                   b.title AS book_title,
                   b.author AS book_author,
                   b.cover_url AS book_cover_url
            FROM reviews r
            JOIN follows f ON f.following_id = r.user_id AND f.follower_id = $1
            JOIN users u ON u.id = r.user_id
            JOIN books b ON b.id = r.book_id
            WHERE NOT r.is_private
            ORDER BY r.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FeedItem {
                author: row.inner.author(),
                review: row.inner.review,
                book_title: row.book_title,
                book_author: row.book_author,
                book_cover_url: row.book_cover_url,
            })
            .collect())
    }

    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO follows (follower_id, following_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(follower_id)
        .bind(following_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
            .bind(follower_id)
            .bind(following_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = $1 AND following_id = $2)",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn list_followers(&self, user_id: Uuid, page: Page) -> Result<Vec<UserSummary>> {
        let users = sqlx::query_as::<_, UserSummary>(
            r#"
            SELECT u.id, u.username, u.display_name, u.avatar_url
            FROM follows f
            JOIN users u ON u.id = f.follower_id
            WHERE f.following_id = $1
            ORDER BY f.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn list_following(&self, user_id: Uuid, page: Page) -> Result<Vec<UserSummary>> {
        let users = sqlx::query_as::<_, UserSummary>(
            r#"
            SELECT u.id, u.username, u.display_name, u.avatar_url
            FROM follows f
            JOIN users u ON u.id = f.following_id
            WHERE f.follower_id = $1
            ORDER BY f.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn create_collection(&self, collection: Collection) -> Result<Collection> {
        let collection = sqlx::query_as::<_, Collection>(
            r#"
            INSERT INTO collections (id, user_id, name, description, is_public, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(collection.id)
        .bind(collection.user_id)
        .bind(&collection.name)
        .bind(&collection.description)
        .bind(collection.is_public)
        .bind(collection.created_at)
        .bind(collection.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(collection)
    }

    async fn find_collection(&self, id: Uuid) -> Result<Option<Collection>> {
        let collection = sqlx::query_as::<_, Collection>("SELECT * FROM collections WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(collection)
    }

    async fn list_collections(&self, user_id: Uuid, public_only: bool) -> Result<Vec<Collection>> {
        let collections = sqlx::query_as::<_, Collection>(
            r#"
            SELECT * FROM collections
            WHERE user_id = $1 AND (is_public OR NOT $2)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .bind(public_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(collections)
    }

    async fn save_collection(&self, collection: &Collection) -> Result<Collection> {
        sqlx::query_as::<_, Collection>(
            r#"
            UPDATE collections
            SET name = $2, description = $3, is_public = $4, updated_at = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(collection.id)
        .bind(&collection.name)
        .bind(&collection.description)
        .bind(collection.is_public)
        .bind(collection.updated_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Collection"))
    }

    async fn delete_collection(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM collections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_collection_book(&self, collection_id: Uuid, book_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO collection_books (collection_id, book_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(collection_id)
        .bind(book_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_collection_book(&self, collection_id: Uuid, book_id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM collection_books WHERE collection_id = $1 AND book_id = $2")
                .bind(collection_id)
                .bind(book_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_collection_books(&self, collection_id: Uuid) -> Result<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT b.* FROM collection_books cb
            JOIN books b ON b.id = cb.book_id
            WHERE cb.collection_id = $1
            ORDER BY cb.added_at
            "#,
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    async fn follow_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO collection_follows (user_id, collection_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(collection_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unfollow_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM collection_follows WHERE user_id = $1 AND collection_id = $2")
                .bind(user_id)
                .bind(collection_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_following_collection(&self, user_id: Uuid, collection_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM collection_follows WHERE user_id = $1 AND collection_id = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn collection_follower_count(&self, collection_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM collection_follows WHERE collection_id = $1")
                .bind(collection_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn append_audit_log(&self, log: AuditLog) -> Result<AuditLog> {
        let log = sqlx::query_as::<_, AuditLog>(
            r#"
            INSERT INTO audit_logs (id, actor_id, action, target_user_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(log.id)
        .bind(log.actor_id)
        .bind(&log.action)
        .bind(log.target_user_id)
        .bind(&log.details)
        .bind(log.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(log)
    }

    async fn list_audit_logs(&self, page: Page) -> Result<Vec<AuditLog>> {
        let logs = sqlx::query_as::<_, AuditLog>(
            "SELECT * FROM audit_logs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}
