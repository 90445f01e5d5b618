use serde::Deserialize;

use super::subscription::effective_plan;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::{AppError, Result};
use crate::models::User;
use crate::store::Page;
use crate::AppState;

/// `?limit=&offset=` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn page(&self) -> Page {
        Page {
            limit: self
                .limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(0).max(0),
        }
    }
}

/// Trim an optional free-text field and enforce its length in characters.
/// Blank input normalizes to an empty string so the caller can clear the field.
pub fn optional_text(value: Option<String>, max_chars: usize, field: &str) -> Result<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };

    let trimmed = value.trim();
    if trimmed.chars().count() > max_chars {
        return Err(AppError::InvalidInput(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

/// Collections need a plan with the `collections` feature
pub async fn require_collections(state: &AppState, user: &User) -> Result<()> {
    let plan = effective_plan(state, user).await?;
    if plan.features.collections {
        Ok(())
    } else {
        Err(AppError::PremiumRequired)
    }
}
