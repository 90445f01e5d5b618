//! Integration tests for the Echo Reads API
//!
//! These tests drive the full router with `oneshot` requests over the
//! in-memory store and fake third-party services.

mod common;

use axum::{body::Body, http::{Request, StatusCode}};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use common::{error_message, TestApp};
use echo_reads::constants::MAX_AVATAR_BYTES;
use echo_reads::models::{NewBook, NewUser, PlanFeatures, ReadingStatus, UsagePeriod, UserBook};
use echo_reads::store::Store;

async fn limit_free_plan(app: &TestApp, max_books: i64) {
    app.store
        .set_plan_features(
            "free",
            PlanFeatures {
                max_books_per_year: Some(max_books),
                collections: false,
            },
        )
        .await;
}

fn remote_book(key: &str, title: &str) -> NewBook {
    NewBook {
        open_library_key: Some(key.to_string()),
        title: title.to_string(),
        author: "Octavia E. Butler".to_string(),
        ..NewBook::default()
    }
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, body) = app.get("/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["backend"], "memory");
    assert!(body["version"].is_string());
}

// =============================================================================
// Authentication Tests
// =============================================================================

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/v1/profile", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(&body), "Unauthorized");

    let (status, _) = app.get("/api/v1/profile", Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_first_request_provisions_user_once() {
    let app = TestApp::new();

    let (token, id) = app.sign_in("alice").await;
    let (status, body) = app.get("/api/v1/profile", Some(&token)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.to_string());
    assert_eq!(body["username"], "alice");
    assert_eq!(body["role"], "user");
    assert_eq!(body["isPremium"], false);
    assert_eq!(app.store.stats().await.unwrap().user_count, 1);

    let subjects = app.wait_for_emails(1).await;
    assert_eq!(subjects, vec!["Welcome to Echo Reads".to_string()]);
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let app = TestApp::new();

    let request = Request::builder()
        .uri("/api/v1/profile")
        .header("cookie", "theme=dark; __session=token:carol")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clerkId"], "carol");
}

#[tokio::test]
async fn test_bearer_token_takes_precedence_over_cookie() {
    let app = TestApp::new();

    let request = Request::builder()
        .uri("/api/v1/profile")
        .header("authorization", "Bearer token:dave")
        .header("cookie", "__session=token:carol")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clerkId"], "dave");
}

#[tokio::test]
async fn test_empty_or_foreign_cookie_is_unauthorized() {
    let app = TestApp::new();

    for cookie in ["__session=", "__session_other=token:carol"] {
        let request = Request::builder()
            .uri("/api/v1/profile")
            .header("cookie", cookie)
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED, "cookie {cookie}");
        assert_eq!(error_message(&body), "Unauthorized");
    }
}

#[tokio::test]
async fn test_taken_username_is_dropped_on_provisioning() {
    let app = TestApp::new();
    app.sign_in("alice").await;

    app.identity.set_profile(
        "user_2",
        NewUser {
            clerk_id: "user_2".to_string(),
            username: Some("alice".to_string()),
            ..NewUser::default()
        },
    );
    let (status, body) = app.get("/api/v1/profile", Some("token:user_2")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["username"].is_null());
}

// =============================================================================
// Book Search Tests
// =============================================================================

#[tokio::test]
async fn test_search_rejects_short_query() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/v1/books/search?q=a", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("between 2 and 200"));

    let (status, _) = app.get("/api/v1/books/search", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_seeds_catalog_from_remote() {
    let app = TestApp::new();
    app.seed_book("Kindred", "Octavia E. Butler", Some(264)).await;
    app.catalog.set_results(vec![
        remote_book("/works/OL1W", "Parable of the Sower"),
        remote_book("/works/OL2W", "Parable of the Talents"),
    ]);

    let (status, body) = app.get("/api/v1/books/search?q=butler", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["seeded"], 2);
    let titles: Vec<&str> = body["books"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles[0], "Kindred");
    assert!(titles.contains(&"Parable of the Sower"));
    assert_eq!(titles.len(), 3);

    // Same search again: remote hits are refreshed, not duplicated
    let (_, body) = app.get("/api/v1/books/search?q=butler", None).await;
    assert_eq!(body["books"].as_array().unwrap().len(), 3);
    assert_eq!(app.store.stats().await.unwrap().book_count, 3);
}

#[tokio::test]
async fn test_search_skips_remote_with_enough_local_hits() {
    let app = TestApp::new();
    for i in 0..5 {
        app.seed_book(&format!("Discworld {i}"), "Terry Pratchett", None)
            .await;
    }

    let (status, body) = app.get("/api/v1/books/search?q=discworld", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["books"].as_array().unwrap().len(), 5);
    assert_eq!(body["seeded"], 0);
    assert_eq!(app.catalog.calls(), 0);
}

#[tokio::test]
async fn test_search_degrades_when_remote_fails() {
    let app = TestApp::new();
    app.seed_book("Kindred", "Octavia E. Butler", None).await;
    app.catalog.fail();

    let (status, body) = app.get("/api/v1/books/search?q=kindred", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["books"].as_array().unwrap().len(), 1);
    assert_eq!(app.catalog.calls(), 1);
}

#[tokio::test]
async fn test_get_book_with_rating_and_library_entry() {
    let app = TestApp::new();
    let book = app.seed_book("Piranesi", "Susanna Clarke", Some(272)).await;
    let (alice, _) = app.sign_in("alice").await;
    let (bob, _) = app.sign_in("bob").await;

    app.shelve(&alice, book.id, "finished").await;
    app.shelve(&bob, book.id, "finished").await;
    app.put("/api/v1/reviews", Some(&alice), json!({"bookId": book.id, "rating": 5}))
        .await;
    app.put(
        "/api/v1/reviews",
        Some(&bob),
        json!({"bookId": book.id, "rating": 1, "isPrivate": true}),
    )
    .await;

    let uri = format!("/api/v1/books/{}", book.id);
    let (status, body) = app.get(&uri, Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Piranesi");
    assert_eq!(body["averageRating"].as_f64(), Some(5.0));
    assert_eq!(body["reviewCount"], 1);
    assert_eq!(body["libraryEntry"]["status"], "finished");

    let (_, anonymous) = app.get(&uri, None).await;
    assert!(anonymous["libraryEntry"].is_null());

    let missing = format!("/api/v1/books/{}", uuid::Uuid::new_v4());
    let (status, body) = app.get(&missing, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "Book not found");
}

// =============================================================================
// Library Tests
// =============================================================================

#[tokio::test]
async fn test_library_entries_are_unique() {
    let app = TestApp::new();
    let book = app.seed_book("Station Eleven", "Emily St. John Mandel", None).await;
    let (token, _) = app.sign_in("alice").await;

    let entry = app.shelve(&token, book.id, "want").await;
    assert_eq!(entry["status"], "want");
    assert!(entry["startedAt"].is_null());

    let (status, body) = app
        .post("/api/v1/library", Some(&token), json!({"bookId": book.id}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), "Book is already in your library");

    let (status, _) = app
        .post(
            "/api/v1/library",
            Some(&token),
            json!({"bookId": uuid::Uuid::new_v4()}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_transitions_set_timestamps_once() {
    let app = TestApp::new();
    let book = app.seed_book("The Left Hand of Darkness", "Ursula K. Le Guin", Some(304)).await;
    let (token, _) = app.sign_in("alice").await;
    app.shelve(&token, book.id, "want").await;
    let uri = format!("/api/v1/library/{}", book.id);

    let (status, reading) = app.patch(&uri, Some(&token), json!({"status": "reading"})).await;
    assert_eq!(status, StatusCode::OK);
    let started_at = reading["startedAt"].clone();
    assert!(started_at.is_string());
    assert!(reading["finishedAt"].is_null());

    let (_, finished) = app
        .patch(&uri, Some(&token), json!({"status": "finished", "currentPage": 304}))
        .await;
    assert_eq!(finished["startedAt"], started_at);
    assert!(finished["finishedAt"].is_string());
    assert_eq!(finished["currentPage"], 304);

    // Re-reading keeps both dates
    let (_, reread) = app.patch(&uri, Some(&token), json!({"status": "reading"})).await;
    assert_eq!(reread["status"], "reading");
    assert_eq!(reread["startedAt"], started_at);
    assert_eq!(reread["finishedAt"], finished["finishedAt"]);
}

#[tokio::test]
async fn test_current_page_validation() {
    let app = TestApp::new();
    let book = app.seed_book("Short Story", "Anon", Some(20)).await;
    let (token, _) = app.sign_in("alice").await;
    app.shelve(&token, book.id, "reading").await;
    let uri = format!("/api/v1/library/{}", book.id);

    let (status, _) = app.patch(&uri, Some(&token), json!({"currentPage": -1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.patch(&uri, Some(&token), json!({"currentPage": 21})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("20 pages"));

    let (status, body) = app.patch(&uri, Some(&token), json!({"currentPage": 12})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentPage"], 12);

    let missing = format!("/api/v1/library/{}", uuid::Uuid::new_v4());
    let (status, _) = app.patch(&missing, Some(&token), json!({"status": "reading"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_library_filters_by_status() {
    let app = TestApp::new();
    let a = app.seed_book("A", "Author", None).await;
    let b = app.seed_book("B", "Author", None).await;
    let (token, _) = app.sign_in("alice").await;
    app.shelve(&token, a.id, "want").await;
    app.shelve(&token, b.id, "finished").await;

    let (_, all) = app.get("/api/v1/library", Some(&token)).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, finished) = app.get("/api/v1/library?status=finished", Some(&token)).await;
    let finished = finished.as_array().unwrap();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0]["book"]["title"], "B");
    assert_eq!(finished[0]["bookId"], b.id.to_string());
}

#[tokio::test]
async fn test_malformed_requests_get_json_errors() {
    let app = TestApp::new();
    let (token, _) = app.sign_in("alice").await;

    let (status, body) = app
        .post("/api/v1/library", Some(&token), json!({"bookId": "not-a-uuid"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_object(), "expected a JSON error, got {body}");
    assert!(error_message(&body).contains("bookId"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/library")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from("{\"bookId\":"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!error_message(&body).is_empty());

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/library")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from("bookId=1"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!error_message(&body).is_empty());

    let (status, body) = app.get("/api/v1/books/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!error_message(&body).is_empty());

    let (status, body) = app
        .patch("/api/v1/library/42", Some(&token), json!({"status": "reading"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!error_message(&body).is_empty());

    let (status, body) = app.get("/api/v1/library?status=skimmed", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!error_message(&body).is_empty());
}

#[tokio::test]
async fn test_concurrent_additions_respect_the_limit() {
    let app = TestApp::new();
    limit_free_plan(&app, 1).await;
    let (token, _) = app.sign_in("alice").await;
    let one = app.seed_book("One", "Author", None).await;
    let two = app.seed_book("Two", "Author", None).await;
    let three = app.seed_book("Three", "Author", None).await;

    let (a, b, c) = tokio::join!(
        app.post("/api/v1/library", Some(&token), json!({"bookId": one.id})),
        app.post("/api/v1/library", Some(&token), json!({"bookId": two.id})),
        app.post("/api/v1/library", Some(&token), json!({"bookId": three.id})),
    );
    let statuses = [a.0, b.0, c.0];

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CREATED).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::FORBIDDEN).count(), 2);

    let (_, library) = app.get("/api/v1/library", Some(&token)).await;
    assert_eq!(library.as_array().unwrap().len(), 1);
    let (_, overview) = app.get("/api/v1/subscription", Some(&token)).await;
    assert_eq!(overview["usage"]["booksAdded"], 1);
}

#[tokio::test]
async fn test_free_plan_usage_limit() {
    let app = TestApp::new();
    limit_free_plan(&app, 2).await;
    let (token, user_id) = app.sign_in("alice").await;
    let books = [
        app.seed_book("One", "Author", None).await,
        app.seed_book("Two", "Author", None).await,
        app.seed_book("Three", "Author", None).await,
    ];

    app.shelve(&token, books[0].id, "want").await;
    app.shelve(&token, books[1].id, "want").await;

    let (status, body) = app
        .post("/api/v1/library", Some(&token), json!({"bookId": books[2].id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(error_message(&body).contains("Usage limit reached"));

    // Premium lifts the cap
    app.make_premium(user_id).await;
    app.shelve(&token, books[2].id, "want").await;
}

#[tokio::test]
async fn test_removing_a_book_does_not_refund_usage() {
    let app = TestApp::new();
    limit_free_plan(&app, 1).await;
    let (token, _) = app.sign_in("alice").await;
    let book = app.seed_book("Once", "Author", None).await;

    app.shelve(&token, book.id, "want").await;
    let (status, _) = app
        .delete(&format!("/api/v1/library/{}", book.id), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/v1/library", Some(&token), json!({"bookId": book.id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, subscription) = app.get("/api/v1/subscription", Some(&token)).await;
    assert_eq!(subscription["usage"]["booksAdded"], 1);
    assert_eq!(subscription["usage"]["remaining"], 0);
}

// =============================================================================
// Review & Feed Tests
// =============================================================================

#[tokio::test]
async fn test_review_requires_library_entry_and_valid_rating() {
    let app = TestApp::new();
    let book = app.seed_book("Dune", "Frank Herbert", None).await;
    let (token, _) = app.sign_in("alice").await;

    let (status, body) = app
        .put("/api/v1/reviews", Some(&token), json!({"bookId": book.id, "rating": 4}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Book must be in your library first");

    app.shelve(&token, book.id, "finished").await;

    for rating in [0, 6] {
        let (status, _) = app
            .put(
                "/api/v1/reviews",
                Some(&token),
                json!({"bookId": book.id, "rating": rating}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let (status, _) = app
        .put(
            "/api/v1/reviews",
            Some(&token),
            json!({"bookId": book.id, "rating": 4, "content": "x".repeat(5001)}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_review_upsert_keeps_one_per_book() {
    let app = TestApp::new();
    let book = app.seed_book("Dune", "Frank Herbert", None).await;
    let (token, _) = app.sign_in("alice").await;
    app.shelve(&token, book.id, "finished").await;

    let (_, first) = app
        .put(
            "/api/v1/reviews",
            Some(&token),
            json!({"bookId": book.id, "rating": 3, "content": "Long."}),
        )
        .await;
    let (status, second) = app
        .put(
            "/api/v1/reviews",
            Some(&token),
            json!({"bookId": book.id, "rating": 5, "content": "  Grew on me.  "}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["rating"], 5);
    assert_eq!(second["content"], "Grew on me.");

    let (_, mine) = app.get("/api/v1/reviews", Some(&token)).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let uri = format!("/api/v1/reviews/{}", book.id);
    let (status, _) = app.delete(&uri, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.delete(&uri, Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "Review not found");
}

#[tokio::test]
async fn test_private_reviews_are_only_visible_to_author() {
    let app = TestApp::new();
    let book = app.seed_book("Private Thoughts", "Anon", None).await;
    let (alice, _) = app.sign_in("alice").await;
    let (bob, bob_id) = app.sign_in("bob").await;

    app.shelve(&bob, book.id, "finished").await;
    app.put(
        "/api/v1/reviews",
        Some(&bob),
        json!({"bookId": book.id, "rating": 2, "isPrivate": true}),
    )
    .await;
    app.post(&format!("/api/v1/social/follow/{bob_id}"), Some(&alice), json!({}))
        .await;

    let uri = format!("/api/v1/books/{}/reviews", book.id);
    let (_, as_alice) = app.get(&uri, Some(&alice)).await;
    assert!(as_alice.as_array().unwrap().is_empty());
    let (_, anonymous) = app.get(&uri, None).await;
    assert!(anonymous.as_array().unwrap().is_empty());
    let (_, as_bob) = app.get(&uri, Some(&bob)).await;
    assert_eq!(as_bob.as_array().unwrap().len(), 1);
    assert_eq!(as_bob[0]["author"]["username"], "bob");

    let (_, profile) = app.get("/api/v1/users/bob", Some(&alice)).await;
    assert!(profile["reviews"].as_array().unwrap().is_empty());

    let (_, feed) = app.get("/api/v1/feed", Some(&alice)).await;
    assert!(feed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_feed_shows_public_reviews_of_followed_users() {
    let app = TestApp::new();
    let book = app.seed_book("Hyperion", "Dan Simmons", None).await;
    let (alice, _) = app.sign_in("alice").await;
    let (bob, bob_id) = app.sign_in("bob").await;
    let (carol, _) = app.sign_in("carol").await;

    for token in [&bob, &carol] {
        app.shelve(token, book.id, "finished").await;
        app.put(
            "/api/v1/reviews",
            Some(token),
            json!({"bookId": book.id, "rating": 4, "content": "Pilgrims!"}),
        )
        .await;
    }
    app.post(&format!("/api/v1/social/follow/{bob_id}"), Some(&alice), json!({}))
        .await;

    let (status, feed) = app.get("/api/v1/feed?limit=10", Some(&alice)).await;

    assert_eq!(status, StatusCode::OK);
    let items = feed.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["author"]["username"], "bob");
    assert_eq!(items[0]["bookTitle"], "Hyperion");
    assert_eq!(items[0]["content"], "Pilgrims!");
}

// =============================================================================
// Social Tests
// =============================================================================

#[tokio::test]
async fn test_follow_rules() {
    let app = TestApp::new();
    let (alice, alice_id) = app.sign_in("alice").await;
    let (bob, bob_id) = app.sign_in("bob").await;

    let (status, body) = app
        .post(&format!("/api/v1/social/follow/{alice_id}"), Some(&alice), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "You cannot follow yourself");

    let (status, _) = app
        .post(
            &format!("/api/v1/social/follow/{}", uuid::Uuid::new_v4()),
            Some(&alice),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Idempotent
    for _ in 0..2 {
        let (status, body) = app
            .post(&format!("/api/v1/social/follow/{bob_id}"), Some(&alice), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["following"], true);
    }

    let (_, following) = app.get("/api/v1/social/following", Some(&alice)).await;
    assert_eq!(following.as_array().unwrap().len(), 1);
    assert_eq!(following[0]["username"], "bob");

    let (_, followers) = app.get("/api/v1/social/followers", Some(&bob)).await;
    assert_eq!(followers[0]["id"], alice_id.to_string());

    let (_, profile) = app.get("/api/v1/users/bob", Some(&alice)).await;
    assert_eq!(profile["followerCount"], 1);
    assert_eq!(profile["followingCount"], 0);
    assert_eq!(profile["isFollowing"], true);

    let (status, body) = app
        .delete(&format!("/api/v1/social/follow/{bob_id}"), Some(&alice))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["following"], false);

    let (_, profile) = app.get("/api/v1/users/bob", None).await;
    assert_eq!(profile["followerCount"], 0);
    assert_eq!(profile["isFollowing"], false);

    let (status, _) = app.get("/api/v1/users/nobody_here", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Profile Tests
// =============================================================================

#[tokio::test]
async fn test_profile_update_validation() {
    let app = TestApp::new();
    let (alice, _) = app.sign_in("alice").await;
    app.sign_in("bob").await;

    let (status, _) = app
        .patch("/api/v1/profile", Some(&alice), json!({"username": "no spaces"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .patch("/api/v1/profile", Some(&alice), json!({"username": "bob"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), "Username is already taken");

    let (status, _) = app
        .patch("/api/v1/profile", Some(&alice), json!({"bio": "x".repeat(501)}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .patch(
            "/api/v1/profile",
            Some(&alice),
            json!({"username": "Alice_Reads", "displayName": " Alice ", "bio": "Mostly SF."}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice_reads");
    assert_eq!(body["displayName"], "Alice");
    assert_eq!(body["bio"], "Mostly SF.");

    let (status, _) = app.get("/api/v1/users/alice_reads", None).await;
    assert_eq!(status, StatusCode::OK);
}

fn avatar_request(token: &str, content_type: &str, bytes: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/profile/avatar")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", content_type)
        .body(Body::from(bytes))
        .unwrap()
}

#[tokio::test]
async fn test_avatar_upload() {
    let app = TestApp::new();
    let (token, user_id) = app.sign_in("alice").await;

    let (status, body) = app
        .send(avatar_request(&token, "image/png", vec![0x89, b'P', b'N', b'G']))
        .await;
    assert_eq!(status, StatusCode::OK);
    let url = body["avatarUrl"].as_str().unwrap();
    assert!(url.starts_with(&format!("https://cdn.echoreads.test/avatars/{user_id}/")));
    assert!(url.ends_with(".png"));

    let objects = app.storage.objects.lock().unwrap().clone();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].2, "image/png");

    let (status, _) = app
        .send(avatar_request(&token, "image/svg+xml", vec![b'<']))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(avatar_request(&token, "image/jpeg", vec![0; MAX_AVATAR_BYTES + 1]))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_message(&body), "Upload size exceeds maximum allowed");
}

#[tokio::test]
async fn test_delete_account_cascades() {
    let app = TestApp::new();
    let book = app.seed_book("Gone", "Author", None).await;
    let (alice, _) = app.sign_in("alice").await;
    let (bob, bob_id) = app.sign_in("bob").await;
    app.shelve(&alice, book.id, "want").await;
    app.post(&format!("/api/v1/social/follow/{bob_id}"), Some(&alice), json!({}))
        .await;

    let (status, body) = app.delete("/api/v1/profile", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let stats = app.store.stats().await.unwrap();
    assert_eq!(stats.user_count, 1);
    assert_eq!(stats.library_entry_count, 0);

    let (_, followers) = app.get("/api/v1/social/followers", Some(&bob)).await;
    assert!(followers.as_array().unwrap().is_empty());
}

// =============================================================================
// Collection Tests
// =============================================================================

#[tokio::test]
async fn test_collections_require_premium() {
    let app = TestApp::new();
    let (token, _) = app.sign_in("alice").await;

    let (status, body) = app
        .post("/api/v1/collections", Some(&token), json!({"name": "Favourites"}))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "Premium subscription required");
}

#[tokio::test]
async fn test_collections_follow_the_plan_feature_flag() {
    let app = TestApp::new();
    let (token, user_id) = app.sign_in("alice").await;

    app.store
        .set_plan_features(
            "free",
            PlanFeatures {
                max_books_per_year: Some(100),
                collections: true,
            },
        )
        .await;
    let (status, _) = app
        .post("/api/v1/collections", Some(&token), json!({"name": "Favourites"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.store
        .set_plan_features(
            "premium",
            PlanFeatures {
                max_books_per_year: None,
                collections: false,
            },
        )
        .await;
    app.make_premium(user_id).await;
    let (status, body) = app
        .post("/api/v1/collections", Some(&token), json!({"name": "Second"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "Premium subscription required");
}

#[tokio::test]
async fn test_collection_lifecycle() {
    let app = TestApp::new();
    let in_library = app.seed_book("Ancillary Justice", "Ann Leckie", None).await;
    let elsewhere = app.seed_book("Not Mine", "Someone", None).await;
    let (alice, alice_id) = app.sign_in("alice").await;
    let (bob, _) = app.sign_in("bob").await;
    app.make_premium(alice_id).await;
    app.shelve(&alice, in_library.id, "finished").await;

    let (status, created) = app
        .post(
            "/api/v1/collections",
            Some(&alice),
            json!({"name": "  Space opera  ", "description": "Ships with feelings"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Space opera");
    assert_eq!(created["isPublic"], false);
    let id = created["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/collections/{id}");
    let books_uri = format!("{uri}/books");

    let (status, body) = app
        .post(&books_uri, Some(&alice), json!({"bookId": elsewhere.id}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Book must be in your library first");

    let (status, body) = app
        .post(&books_uri, Some(&alice), json!({"bookId": in_library.id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], true);

    // Private: hidden from others
    let (status, _) = app.get(&uri, Some(&bob)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = app.get("/api/v1/users/alice/collections", None).await;
    assert!(listed.as_array().unwrap().is_empty());

    let (status, updated) = app
        .patch(&uri, Some(&alice), json!({"isPublic": true, "description": ""}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["isPublic"], true);
    assert!(updated["description"].is_null());

    // Public: others can read and follow, but not modify
    let (status, details) = app.get(&uri, Some(&bob)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["books"][0]["title"], "Ancillary Justice");

    let (status, _) = app.patch(&uri, Some(&bob), json!({"name": "Mine now"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.post(&format!("{uri}/follow"), Some(&alice), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post(&format!("{uri}/follow"), Some(&bob), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, details) = app.get(&uri, Some(&bob)).await;
    assert_eq!(details["followerCount"], 1);
    assert_eq!(details["isFollowing"], true);

    let (_, listed) = app.get("/api/v1/users/alice/collections", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _) = app.delete(&uri, Some(&bob)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.delete(&uri, Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&uri, Some(&alice)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_removing_library_book_detaches_it_from_collections() {
    let app = TestApp::new();
    let book = app.seed_book("The Fifth Season", "N. K. Jemisin", None).await;
    let (alice, alice_id) = app.sign_in("alice").await;
    app.make_premium(alice_id).await;
    app.shelve(&alice, book.id, "reading").await;

    let (_, created) = app
        .post("/api/v1/collections", Some(&alice), json!({"name": "Broken Earth"}))
        .await;
    let uri = format!("/api/v1/collections/{}", created["id"].as_str().unwrap());
    app.post(&format!("{uri}/books"), Some(&alice), json!({"bookId": book.id}))
        .await;

    app.delete(&format!("/api/v1/library/{}", book.id), Some(&alice))
        .await;

    let (_, details) = app.get(&uri, Some(&alice)).await;
    assert!(details["books"].as_array().unwrap().is_empty());

    let (status, _) = app
        .delete(&format!("{uri}/books/{}", book.id), Some(&alice))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[tokio::test]
async fn test_plans_and_subscription_overview() {
    let app = TestApp::new();
    let book = app.seed_book("Counted", "Author", None).await;
    let (token, _) = app.sign_in("alice").await;
    app.shelve(&token, book.id, "want").await;

    let (status, plans) = app.get("/api/v1/plans", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plans.as_array().unwrap().len(), 2);
    assert_eq!(plans[0]["features"]["maxBooksPerYear"], 100);

    let (status, overview) = app.get("/api/v1/subscription", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["plan"]["id"], "free");
    assert_eq!(overview["isPremium"], false);
    assert!(overview["subscription"].is_null());
    assert_eq!(overview["usage"]["booksAdded"], 1);
    assert_eq!(overview["usage"]["limit"], 100);
    assert_eq!(overview["usage"]["remaining"], 99);
}

#[tokio::test]
async fn test_usage_period_rolls_over_on_the_premium_anniversary() {
    let app = TestApp::new();
    let old_book = app.seed_book("Last Year", "Author", None).await;
    let new_book = app.seed_book("This Year", "Author", None).await;
    let (token, user_id) = app.sign_in("alice").await;

    let (_, overview) = app.get("/api/v1/subscription", Some(&token)).await;
    let created_start: DateTime<Utc> = overview["usage"]["periodStart"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // Premium first granted 400 days ago, since lapsed
    let anchor = Utc::now() - Duration::days(400);
    app.store.set_premium(user_id, true, anchor).await.unwrap();
    app.store.set_premium(user_id, false, Utc::now()).await.unwrap();

    let previous = UsagePeriod::containing(anchor, anchor + Duration::days(1));
    let entry = UserBook::new(user_id, old_book.id, ReadingStatus::Finished, previous.start);
    app.store.add_to_library(entry, previous, None).await.unwrap();

    let (status, overview) = app.get("/api/v1/subscription", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let period_start: DateTime<Utc> = overview["usage"]["periodStart"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let period_end: DateTime<Utc> = overview["usage"]["periodEnd"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    assert_ne!(period_start, created_start);
    assert_eq!(period_start, previous.end);
    assert_eq!(period_end, UsagePeriod::containing(anchor, previous.end).end);
    assert_eq!(overview["usage"]["booksAdded"], 0);
    assert_eq!(overview["usage"]["remaining"], 100);

    app.shelve(&token, new_book.id, "want").await;
    let (_, overview) = app.get("/api/v1/subscription", Some(&token)).await;
    assert_eq!(overview["usage"]["booksAdded"], 1);
}

#[tokio::test]
async fn test_checkout_and_portal() {
    let app = TestApp::new();
    let (token, user_id) = app.sign_in("alice").await;

    let (status, body) = app
        .post("/api/v1/subscription/checkout", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://checkout.stripe.test/c/session_1");

    let checkout = app.billing.checkouts.lock().unwrap()[0].clone();
    assert_eq!(checkout.user_id, user_id);
    assert_eq!(checkout.price_id, common::PREMIUM_PRICE_ID);
    assert_eq!(checkout.email.as_deref(), Some("alice@example.com"));

    let (status, body) = app
        .post("/api/v1/subscription/portal", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "No billing account found");

    app.store.link_stripe_customer(user_id, "cus_123").await.unwrap();
    app.make_premium(user_id).await;

    let (status, _) = app
        .post("/api/v1/subscription/checkout", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .post("/api/v1/subscription/portal", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://billing.stripe.test/p/session_1");
    assert_eq!(app.billing.portals.lock().unwrap()[0], "cus_123");
}

// =============================================================================
// Admin Tests
// =============================================================================

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let app = TestApp::new();
    let (token, _) = app.sign_in("alice").await;

    let (status, body) = app.get("/api/v1/admin/users", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "Admin access required");

    let (status, _) = app.get("/api/v1/admin/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_mutations_are_audited() {
    let app = TestApp::new();
    let (admin, admin_id) = app.sign_in("admin").await;
    let (_, bob_id) = app.sign_in("bob").await;
    let (_, carol_id) = app.sign_in("carol").await;
    app.make_admin(admin_id).await;

    let (status, users) = app.get("/api/v1/admin/users", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 3);

    let (status, _) = app
        .patch(
            &format!("/api/v1/admin/users/{admin_id}/role"),
            Some(&admin),
            json!({"role": "user"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .delete(&format!("/api/v1/admin/users/{admin_id}"), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .patch(
            &format!("/api/v1/admin/users/{bob_id}/role"),
            Some(&admin),
            json!({"role": "admin"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");

    let (status, _) = app
        .delete(&format!("/api/v1/admin/users/{carol_id}"), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .delete(&format!("/api/v1/admin/users/{carol_id}"), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, logs) = app.get("/api/v1/admin/audit-logs", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 2);

    assert_eq!(logs[0]["action"], "user.deleted");
    assert_eq!(logs[0]["actorId"], admin_id.to_string());
    assert!(logs[0]["targetUserId"].is_null());
    assert_eq!(logs[0]["details"]["username"], "carol");

    assert_eq!(logs[1]["action"], "user.role_changed");
    assert_eq!(logs[1]["targetUserId"], bob_id.to_string());
    assert_eq!(logs[1]["details"]["from"], "user");
    assert_eq!(logs[1]["details"]["to"], "admin");

    let (status, stats) = app.get("/api/v1/admin/stats", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["userCount"], 2);
}
