//! Strong newtypes for domain identifiers.
//!
//! These newtypes provide compile-time type safety, preventing accidental
//! misuse of IDs (e.g., passing a `WorkspaceId` where a `RepositoryId` is
//! expected).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            #[inline]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            #[inline]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! slug_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(GrantId);
id_newtype!(RepositoryId);
id_newtype!(AccessTokenId);
id_newtype!(WorkspaceId);
id_newtype!(ActionId);
id_newtype!(ActionRunId);
id_newtype!(ActionArtifactId);
id_newtype!(EventId);
id_newtype!(CommentId);

slug_newtype!(Username);
slug_newtype!(RepoSlug);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_newtype_conversion_round_trips() {
        let id = RepositoryId::new(42);
        assert_eq!(id.get(), 42);
        assert_eq!(i64::from(id), 42);

        let id2: RepositoryId = 100.into();
        assert_eq!(id2.get(), 100);
    }

    #[test]
    fn slug_newtype_conversion_round_trips() {
        let slug = RepoSlug::new("my-repo");
        assert_eq!(slug.as_str(), "my-repo");

        let slug2: RepoSlug = "another-repo".into();
        assert_eq!(slug2.as_str(), "another-repo");
    }

    #[test]
    fn ids_of_different_entities_are_distinct_types() {
        let repo_id = RepositoryId::new(1);
        let user_id = UserId::new(1);
        assert_eq!(repo_id.get(), user_id.get());
        // `repo_id == user_id` would not compile: different newtypes.
    }

    #[test]
    fn serde_transparent_round_trip() {
        let id = RepositoryId::new(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");

        let slug = RepoSlug::new("test-slug");
        let json = serde_json::to_string(&slug).unwrap();
        assert_eq!(json, "\"test-slug\"");
    }
}
