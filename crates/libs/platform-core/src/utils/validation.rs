//! Input validation with actionable suggestions.
//!
//! Validation failures carry enough structure for the server layer to
//! surface a `field`/`reason`/`suggestion` triple in an error response
//! body, rather than a flat string.

#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,39}$").expect("valid regex pattern"));
static REPO_SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]{0,99}$").expect("valid regex pattern"));
static BRANCH_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9/_.-]{0,199}$").expect("valid regex pattern"));

/// Input validation errors with recovery hints.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ValidationError {
    #[error("Username must match ^[a-zA-Z0-9_-]{{1,39}}$, got: {provided}")]
    InvalidUsername { provided: String, suggestion: String },

    #[error("Repository slug must match ^[a-zA-Z0-9][a-zA-Z0-9_.-]{{0,99}}$, got: {provided}")]
    InvalidRepoSlug { provided: String, suggestion: String },

    #[error("Branch name is not a valid git ref name: {provided}")]
    InvalidBranchName { provided: String },

    #[error("Artifact pattern must be relative (no leading /), got: {provided}")]
    AbsolutePatternNotAllowed { provided: String, suggestion: String },

    #[error("TTL must be between {min}s and {max}s, got: {provided}s")]
    InvalidTtl {
        provided: u64,
        min: u64,
        max: u64,
        suggestion: u64,
    },

    #[error("Entity not found: {entity_type} with {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },
}

impl ValidationError {
    pub fn context(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Validate a username: 1-39 chars, alphanumeric plus `_`/`-`. Mirrors
/// GitHub's own handle constraints closely enough to be unsurprising.
pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    if USERNAME_RE.is_match(name) {
        return Ok(());
    }
    Err(ValidationError::InvalidUsername {
        provided: name.to_string(),
        suggestion: sanitize_slug(name, 39),
    })
}

/// Validate a repository slug.
pub fn validate_repo_slug(slug: &str) -> Result<(), ValidationError> {
    if REPO_SLUG_RE.is_match(slug) {
        return Ok(());
    }
    Err(ValidationError::InvalidRepoSlug {
        provided: slug.to_string(),
        suggestion: sanitize_slug(slug, 100),
    })
}

/// Validate a git branch/ref name used for push targets and action
/// branch filters.
pub fn validate_branch_name(name: &str) -> Result<(), ValidationError> {
    if BRANCH_NAME_RE.is_match(name) && !name.ends_with('/') && !name.contains("..") {
        return Ok(());
    }
    Err(ValidationError::InvalidBranchName {
        provided: name.to_string(),
    })
}

/// Validate an action artifact glob pattern (must be relative to the
/// workspace root, matching the sandbox's confinement to its own
/// checkout).
pub fn validate_artifact_pattern(pattern: &str) -> Result<(), ValidationError> {
    if pattern.starts_with('/') {
        let suggestion = pattern.trim_start_matches('/').to_string();
        return Err(ValidationError::AbsolutePatternNotAllowed {
            provided: pattern.to_string(),
            suggestion,
        });
    }
    Ok(())
}

/// Validate an access token TTL, in seconds.
pub fn validate_token_ttl(ttl_seconds: u64) -> Result<(), ValidationError> {
    const MIN_TTL: u64 = 60;
    const MAX_TTL: u64 = 24 * 3600;

    if (MIN_TTL..=MAX_TTL).contains(&ttl_seconds) {
        return Ok(());
    }

    Err(ValidationError::InvalidTtl {
        provided: ttl_seconds,
        min: MIN_TTL,
        max: MAX_TTL,
        suggestion: ttl_seconds.clamp(MIN_TTL, MAX_TTL),
    })
}

fn sanitize_slug(input: &str, max_len: usize) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .take(max_len)
        .collect::<String>()
        .to_lowercase()
}
