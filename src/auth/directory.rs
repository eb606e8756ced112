//! User directory — maps verified external subjects to local user records.
//!
//! The [`UserDirectory`] trait is the seam where a relational store plugs in
//! (unique constraint on `external_subject`, insert-or-fetch on conflict).
//! The shipped [`InMemoryUserDirectory`] models the same invariant with an
//! atomic map entry: concurrent `find_or_create` calls for one subject
//! always converge on a single row.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::error::AuthError;

/// A local user record. Created exactly once per distinct external subject;
/// never deleted by this flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Generated local identifier.
    pub id: Uuid,
    /// The provider-issued stable subject identifier (unique).
    pub subject: String,
}

/// Trait abstracting the user store.
///
/// Implementations must be `Send + Sync` because the directory is shared
/// across async tasks.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Return the user for `subject`, creating the record if absent.
    ///
    /// Must uphold the uniqueness invariant under concurrency: a lost
    /// insert race returns the winner's row, never a duplicate and never a
    /// conflict error. Fails only with `StorageUnavailable`.
    async fn find_or_create(&self, subject: &str) -> Result<User, AuthError>;
}

/// In-memory directory backed by a `DashMap` keyed by subject.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    by_subject: DashMap<String, User>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of user rows. Test observability only.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_subject.len()
    }

    /// `true` when no rows exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_or_create(&self, subject: &str) -> Result<User, AuthError> {
        if let Some(existing) = self.by_subject.get(subject) {
            return Ok(existing.clone());
        }

        // The entry is held exclusively while inserting, so a lost race
        // observes the winner's row instead of creating a duplicate.
        let user = self
            .by_subject
            .entry(subject.to_string())
            .or_insert_with(|| {
                let user = User {
                    id: Uuid::new_v4(),
                    subject: subject.to_string(),
                };
                debug!(subject = %subject, user_id = %user.id, "Created user");
                user
            })
            .clone();

        Ok(user)
    }
}
