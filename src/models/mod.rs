pub mod audit;
pub mod book;
pub mod collection;
pub mod library;
pub mod review;
pub mod subscription;
pub mod user;

pub use audit::{AuditAction, AuditLog};
pub use book::{Book, NewBook, RatingSummary};
pub use collection::{Collection, CollectionDetails};
pub use library::{LibraryEntry, ReadingStatus, UserBook};
pub use review::{FeedItem, Review, ReviewDraft, ReviewWithAuthor};
pub use subscription::{
    PlanFeatures, SubscriptionPlan, SubscriptionStatus, SubscriptionUpsert, SubscriptionUsage,
    UsagePeriod, UserSubscription,
};
pub use user::{NewUser, ProfileUpdate, Role, User, UserSummary};
