use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Book;
use crate::constants::{MAX_COLLECTION_DESCRIPTION_LEN, MAX_COLLECTION_NAME_LEN};

/// Premium, user-curated subset of a user's library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    pub fn validate_name(name: &str) -> bool {
        let len = name.trim().chars().count();
        len > 0 && len <= MAX_COLLECTION_NAME_LEN
    }

    pub fn validate_description(description: &str) -> bool {
        description.chars().count() <= MAX_COLLECTION_DESCRIPTION_LEN
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    pub fn visible_to(&self, viewer: Option<Uuid>) -> bool {
        self.is_public || viewer == Some(self.user_id)
    }
}

/// Collection with its books, as shown on the collection page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDetails {
    #[serde(flatten)]
    pub collection: Collection,
    pub books: Vec<Book>,
    pub follower_count: i64,
    pub is_following: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(Collection::validate_name("Summer reads"));
        assert!(!Collection::validate_name("   "));
        assert!(!Collection::validate_name(&"x".repeat(MAX_COLLECTION_NAME_LEN + 1)));
    }

    #[test]
    fn test_visibility() {
        let owner = Uuid::new_v4();
        let collection = Collection {
            id: Uuid::new_v4(),
            user_id: owner,
            name: "Private shelf".to_string(),
            description: None,
            is_public: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(collection.visible_to(Some(owner)));
        assert!(!collection.visible_to(Some(Uuid::new_v4())));
        assert!(!collection.visible_to(None));
        assert!(collection.is_owned_by(owner));
    }
}
