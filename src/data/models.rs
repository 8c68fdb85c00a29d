//! Record types returned by the search layer.
//!
//! `tags` and `images` live in the database as TEXT columns holding
//! JSON-serialized string arrays (a legacy of the original schema). Rows are
//! post-processed into concrete vectors; a malformed column parses to an
//! empty vector, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use ts_rs::TS;

/// A family-friendly local spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Spot {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub address: Option<String>,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A public event with a future-or-present start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub city: Option<String>,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub starts_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct SpotRow {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub address: Option<String>,
    pub tags: Option<String>,
    pub images: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EventRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub city: Option<String>,
    pub tags: Option<String>,
    pub images: Option<String>,
    pub starts_at: DateTime<Utc>,
}

impl From<SpotRow> for Spot {
    fn from(row: SpotRow) -> Self {
        Spot {
            id: row.id,
            name: row.name,
            city: row.city,
            address: row.address,
            tags: parse_string_array(row.tags.as_deref()),
            images: parse_string_array(row.images.as_deref()),
            updated_at: row.updated_at,
        }
    }
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            title: row.title,
            description: row.description,
            city: row.city,
            tags: parse_string_array(row.tags.as_deref()),
            images: parse_string_array(row.images.as_deref()),
            starts_at: row.starts_at,
        }
    }
}

/// Parse a JSON-serialized string array column. `None` and malformed
/// content both yield an empty vector.
pub(crate) fn parse_string_array(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(values) => values,
        Err(e) => {
            warn!(error = %e, "malformed serialized array column, treating as empty");
            Vec::new()
        }
    }
}
