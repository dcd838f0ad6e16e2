//! Shared fixtures for the integration tests

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use star_harvest::config::ApiConfig;
use star_harvest::Record;

/// API configuration pointed at a mock server, with no real waits
pub fn api_config(server_uri: &str) -> ApiConfig {
    ApiConfig {
        endpoint: format!("{}/graphql", server_uri),
        token: Some("test-token".to_string()),
        timeout_secs: 5,
        backoff_base_ms: 10,
        reset_grace_secs: 0,
        rate_limit_fallback_secs: 0,
        ..ApiConfig::default()
    }
}

/// A repository search hit as the API returns it
pub fn node(id: i64, stars: u64) -> Value {
    json!({
        "databaseId": id,
        "owner": { "login": "octo" },
        "name": format!("repo-{}", id),
        "nameWithOwner": format!("octo/repo-{}", id),
        "stargazerCount": stars,
        "createdAt": "2020-01-01T00:00:00Z",
        "updatedAt": "2024-01-01T00:00:00Z"
    })
}

/// A successful search response; `end_cursor` of `None` ends the chain
pub fn search_body(nodes: Vec<Value>, end_cursor: Option<&str>) -> Value {
    json!({
        "data": {
            "search": {
                "pageInfo": {
                    "hasNextPage": end_cursor.is_some(),
                    "endCursor": end_cursor
                },
                "nodes": nodes
            }
        }
    })
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

pub fn record(id: i64, owner: &str, name: &str, stars: u64, updated: DateTime<Utc>) -> Record {
    Record::new(
        id,
        owner,
        name,
        format!("{}/{}", owner, name),
        stars,
        at(0),
        updated,
    )
}
