//! Utility functions and helpers.

pub mod validation;

/// Converts text to a URL-safe slug, used for deriving repository and
/// username defaults from display names.
///
/// ```
/// use platform_core::utils::slugify;
///
/// assert_eq!(slugify("My Cool Repo"), "my-cool-repo");
/// ```
pub fn slugify(text: &str) -> String {
    slug::slugify(text)
}
