//! Harvested repository records and pagination types

use chrono::{DateTime, Utc};
use std::fmt;

/// One repository as observed by a single fetch
///
/// Records are immutable once built: a later fetch of the same repository
/// produces a new `Record` instead of changing an old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    identity: i64,
    owner: String,
    name: String,
    qualified_name: String,
    star_count: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        identity: i64,
        owner: impl Into<String>,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        star_count: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            owner: owner.into(),
            name: name.into(),
            qualified_name: qualified_name.into(),
            star_count,
            created_at,
            updated_at,
        }
    }

    /// Stable external primary key (GitHub `databaseId`)
    pub fn identity(&self) -> i64 {
        self.identity
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `owner/name`, globally unique
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn star_count(&self) -> u64 {
        self.star_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Opaque pagination token pointing at a position in a result stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One batch of records returned by a single fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<Record>,

    /// Cursor for the following page; `None` ends the chain
    pub next_cursor: Option<Cursor>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.next_cursor.is_some()
    }
}
