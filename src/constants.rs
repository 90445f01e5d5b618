/// Plan identifiers seeded by the initial migration
pub const FREE_PLAN_ID: &str = "free";
pub const PREMIUM_PLAN_ID: &str = "premium";

/// Minimum / maximum length of a book search query (after trimming)
pub const MIN_SEARCH_QUERY_LEN: usize = 2;
pub const MAX_SEARCH_QUERY_LEN: usize = 200;

/// Default and maximum number of search results
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 40;

/// Open Library is only consulted when the local catalog returns fewer hits
pub const LOCAL_RESULTS_THRESHOLD: usize = 5;

/// Pagination defaults for list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Review constraints
pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;
pub const MAX_REVIEW_LENGTH: usize = 5000;

/// Profile constraints
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 30;
pub const MAX_DISPLAY_NAME_LEN: usize = 80;
pub const MAX_BIO_LENGTH: usize = 500;

/// Collection constraints
pub const MAX_COLLECTION_NAME_LEN: usize = 100;
pub const MAX_COLLECTION_DESCRIPTION_LEN: usize = 1000;

/// Maximum avatar upload size in bytes (2MB)
pub const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

/// Maximum age of a Stripe webhook signature timestamp in seconds (5 minutes)
/// Prevents replay attacks
pub const STRIPE_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Name of the cookie Clerk stores the session token in
pub const SESSION_COOKIE: &str = "__session";

// =============================================================================
// Error Messages
// =============================================================================

pub const ERR_BOOK_NOT_IN_LIBRARY: &str = "Book must be in your library first";

pub const ERR_ALREADY_IN_LIBRARY: &str = "Book is already in your library";

pub const ERR_USERNAME_TAKEN: &str = "Username is already taken";

pub const ERR_CANNOT_FOLLOW_SELF: &str = "You cannot follow yourself";
