use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AppError;

static TAG_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^tag:\s*(?P<tag>\S.*)$").expect("tag query pattern is valid"));

/// Restriction applied to a question listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionFilter {
    All,
    /// Case-insensitive substring of the title or body.
    Text(String),
    /// Questions carrying this tag, compared case-insensitively.
    Tag(String),
}

impl QuestionFilter {
    /// Parses a search box phrase. `tag:<name>` selects by tag, anything
    /// else is a text match. A missing or blank phrase is a bad request.
    pub fn parse_search(phrase: Option<&str>) -> Result<Self, AppError> {
        let phrase = phrase.map(str::trim).unwrap_or_default();

        if phrase.is_empty() {
            return Err(AppError::BadRequest(
                "A search phrase is required".to_string(),
            ));
        }

        if let Some(captures) = TAG_QUERY.captures(phrase) {
            let tag = captures["tag"].trim().to_string();
            return Ok(QuestionFilter::Tag(tag));
        }

        if phrase.to_ascii_lowercase().starts_with("tag:") {
            return Err(AppError::BadRequest(
                "Tag search needs a tag name".to_string(),
            ));
        }

        Ok(QuestionFilter::Text(phrase.to_string()))
    }
}
