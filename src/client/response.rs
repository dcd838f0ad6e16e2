//! Typed decoding of search responses
//!
//! The whole payload is decoded in one serde step. Anything structurally
//! wrong with the envelope is a [`FetchError::Malformed`]; items are judged
//! one by one.

use crate::client::FetchError;
use crate::record::{Cursor, Page, Record};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<SearchData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: Option<SearchConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<RepositoryNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// A search hit; non-repository hits decode with every field absent
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    database_id: Option<i64>,
    owner: Option<OwnerNode>,
    name: Option<String>,
    name_with_owner: Option<String>,
    stargazer_count: Option<u64>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OwnerNode {
    login: String,
}

impl RepositoryNode {
    /// Converts the node, or names the first missing field
    fn into_record(self, identity: i64) -> Result<Record, &'static str> {
        Ok(Record::new(
            identity,
            self.owner.ok_or("owner")?.login,
            self.name.ok_or("name")?,
            self.name_with_owner.ok_or("nameWithOwner")?,
            self.stargazer_count.ok_or("stargazerCount")?,
            self.created_at.ok_or("createdAt")?,
            self.updated_at.ok_or("updatedAt")?,
        ))
    }
}

/// Decodes a search response body into a [`Page`]
///
/// - `errors` in the payload → [`FetchError::Protocol`]
/// - missing `data.search` or undecodable JSON → [`FetchError::Malformed`]
/// - items without `databaseId` are discarded silently
/// - items with an identity but missing fields are skipped with a warning
/// - the next cursor is present only when `hasNextPage` is true and
///   `endCursor` is non-empty
pub fn decode_page(body: &str) -> Result<Page, FetchError> {
    let response: GraphQlResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
        let messages: Vec<String> = errors
            .into_iter()
            .map(|e| e.message.unwrap_or_else(|| "Unknown error".to_string()))
            .collect();
        return Err(FetchError::Protocol(messages.join(", ")));
    }

    let search = response
        .data
        .and_then(|data| data.search)
        .ok_or_else(|| FetchError::Malformed("response has no data.search".to_string()))?;

    let records = search
        .nodes
        .into_iter()
        .flatten()
        .filter_map(|node| {
            let identity = node.database_id?;
            match node.into_record(identity) {
                Ok(record) => Some(record),
                Err(field) => {
                    tracing::warn!("Skipping repository {}: missing {}", identity, field);
                    None
                }
            }
        })
        .collect();

    let next_cursor = if search.page_info.has_next_page {
        search
            .page_info
            .end_cursor
            .filter(|cursor| !cursor.is_empty())
            .map(Cursor::new)
    } else {
        None
    };

    Ok(Page {
        records,
        next_cursor,
    })
}
