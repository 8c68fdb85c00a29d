//! Spot and event search: ranked full-text with a substring fallback.
//!
//! Free-text input is sanitized before it reaches `to_tsquery` — every
//! character outside ASCII alphanumerics and the Hiragana/Katakana/Kanji
//! blocks is stripped, so tsquery syntax (`&`, `|`, `!`, quotes) can never be
//! injected through user input. Surviving tokens are AND-joined as prefix
//! matches: with the `simple` configuration a compound like `沼津港` is one
//! lexeme, and only `沼津:*` lets the query `沼津` reach it.
//!
//! Full-text failures (index drift, transient backend faults) are never
//! surfaced: the request falls back to the legacy substring mode, which
//! `ILIKE`-matches name/title, city, address/description, and each query
//! token against the serialized tag column.

use sqlx::PgPool;
use sqlx::postgres::PgRow;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::models::{Event, EventRow, Spot, SpotRow};

/// Hard bound on page size, matching the API contract.
pub const MAX_LIMIT: i64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    pub limit: i64,
    pub offset: i64,
    pub use_full_text: bool,
}

/// Which search path actually executed for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SearchMethod {
    FullText,
    Legacy,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::FullText => "fulltext",
            SearchMethod::Legacy => "legacy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub next_offset: Option<i64>,
    pub method: SearchMethod,
}

impl<T> SearchPage<T> {
    fn empty(method: SearchMethod) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            next_offset: None,
            method,
        }
    }

    fn new(items: Vec<T>, total: i64, offset: i64, method: SearchMethod) -> Self {
        let next_offset = next_offset(offset, items.len(), total);
        Self {
            items,
            total,
            next_offset,
            method,
        }
    }
}

pub(crate) fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_LIMIT)
}

pub(crate) fn clamp_offset(offset: i64) -> i64 {
    offset.max(0)
}

/// `Some(offset + returned)` while more rows remain, else `None`.
pub(crate) fn next_offset(offset: i64, returned: usize, total: i64) -> Option<i64> {
    let consumed = offset + returned as i64;
    if consumed < total { Some(consumed) } else { None }
}

/// Characters that survive sanitization: ASCII alphanumerics plus the
/// Hiragana, Katakana (incl. the prolonged sound mark), and CJK Unified
/// Ideograph blocks.
fn is_search_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' | '\u{4E00}'..='\u{9FFF}')
}

/// NFKC-normalize (full-width ASCII and half-width kana fold to their
/// canonical forms), split on whitespace, strip non-search characters, drop
/// empty tokens.
pub(crate) fn sanitize_tokens(query: &str) -> Vec<String> {
    let normalized: String = query.nfkc().collect();
    normalized
        .split_whitespace()
        .map(|token| token.chars().filter(|&c| is_search_char(c)).collect::<String>())
        .filter(|token| !token.is_empty())
        .collect()
}

/// AND-join sanitized tokens into a prefix-matching tsquery expression.
pub(crate) fn tsquery_expression(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| format!("{token}:*"))
        .collect::<Vec<_>>()
        .join(" & ")
}

/// One ILIKE pattern per raw whitespace token. The legacy tag binds keep the
/// tokens unsanitized: all binds are parameterized, and stripping symbols
/// here would stop a token like `カフェ&ランチ` from matching its own tag.
fn legacy_token_patterns(query: &str) -> Vec<String> {
    query.split_whitespace().map(like_pattern).collect()
}

const SPOT_COLUMNS: &str = "id, name, city, address, tags, images, updated_at";
const EVENT_COLUMNS: &str = "id, title, description, city, tags, images, starts_at";

/// Events are only searchable while public and not yet started.
const EVENT_BASE_FILTER: &str = "visibility = 'public' AND starts_at >= now()";

fn fulltext_spots_sql() -> (String, String) {
    let select = format!(
        "SELECT {SPOT_COLUMNS} FROM spots \
         WHERE search_vector @@ to_tsquery('simple', $1) \
         ORDER BY ts_rank(search_vector, to_tsquery('simple', $1)) DESC, updated_at DESC \
         LIMIT $2 OFFSET $3"
    );
    let count = "SELECT COUNT(*) FROM spots WHERE search_vector @@ to_tsquery('simple', $1)"
        .to_owned();
    (select, count)
}

fn fulltext_events_sql() -> (String, String) {
    let select = format!(
        "SELECT {EVENT_COLUMNS} FROM events \
         WHERE {EVENT_BASE_FILTER} AND search_vector @@ to_tsquery('simple', $1) \
         ORDER BY ts_rank(search_vector, to_tsquery('simple', $1)) DESC, starts_at ASC \
         LIMIT $2 OFFSET $3"
    );
    let count = format!(
        "SELECT COUNT(*) FROM events WHERE {EVENT_BASE_FILTER} \
         AND search_vector @@ to_tsquery('simple', $1)"
    );
    (select, count)
}

/// OR-combined substring predicate: the whole query against each text
/// column ($1), plus one bind per token against the serialized tag column
/// ($2..). Bind count = 1 + token_count.
fn legacy_predicate(columns: &[&str], token_count: usize) -> String {
    let mut clauses: Vec<String> = columns.iter().map(|col| format!("{col} ILIKE $1")).collect();
    for i in 0..token_count {
        clauses.push(format!("tags ILIKE ${}", i + 2));
    }
    clauses.join(" OR ")
}

fn legacy_spots_sql(token_count: usize) -> (String, String) {
    let predicate = legacy_predicate(&["name", "city", "address"], token_count);
    let limit_bind = token_count + 2;
    let offset_bind = token_count + 3;
    let select = format!(
        "SELECT {SPOT_COLUMNS} FROM spots WHERE {predicate} \
         ORDER BY updated_at DESC LIMIT ${limit_bind} OFFSET ${offset_bind}"
    );
    let count = format!("SELECT COUNT(*) FROM spots WHERE {predicate}");
    (select, count)
}

fn legacy_events_sql(token_count: usize) -> (String, String) {
    let predicate = legacy_predicate(&["title", "description", "city"], token_count);
    let limit_bind = token_count + 2;
    let offset_bind = token_count + 3;
    let select = format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE {EVENT_BASE_FILTER} AND ({predicate}) \
         ORDER BY starts_at ASC LIMIT ${limit_bind} OFFSET ${offset_bind}"
    );
    let count = format!("SELECT COUNT(*) FROM events WHERE {EVENT_BASE_FILTER} AND ({predicate})");
    (select, count)
}

fn list_spots_sql() -> (String, String) {
    (
        format!("SELECT {SPOT_COLUMNS} FROM spots ORDER BY updated_at DESC LIMIT $1 OFFSET $2"),
        "SELECT COUNT(*) FROM spots".to_owned(),
    )
}

fn list_events_sql() -> (String, String) {
    (
        format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE {EVENT_BASE_FILTER} \
             ORDER BY starts_at ASC LIMIT $1 OFFSET $2"
        ),
        format!("SELECT COUNT(*) FROM events WHERE {EVENT_BASE_FILTER}"),
    )
}

fn like_pattern(s: &str) -> String {
    format!("%{s}%")
}

/// Search spots. Empty queries list in default order; full-text failures
/// fall back to legacy for this request.
pub async fn search_spots(pool: &PgPool, req: &SearchRequest) -> Result<SearchPage<Spot>, sqlx::Error> {
    search_entity::<Spot, SpotRow>(
        pool,
        req,
        list_spots_sql,
        fulltext_spots_sql,
        legacy_spots_sql,
    )
    .await
}

/// Search public upcoming events, ordered by start time.
pub async fn search_events(
    pool: &PgPool,
    req: &SearchRequest,
) -> Result<SearchPage<Event>, sqlx::Error> {
    search_entity::<Event, EventRow>(
        pool,
        req,
        list_events_sql,
        fulltext_events_sql,
        legacy_events_sql,
    )
    .await
}

async fn search_entity<T, R>(
    pool: &PgPool,
    req: &SearchRequest,
    list_sql: fn() -> (String, String),
    fulltext_sql: fn() -> (String, String),
    legacy_sql: fn(usize) -> (String, String),
) -> Result<SearchPage<T>, sqlx::Error>
where
    T: From<R>,
    R: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
{
    let limit = clamp_limit(req.limit);
    let offset = clamp_offset(req.offset);
    let query = req.query.trim();

    if query.is_empty() {
        let (select, count) = list_sql();
        let rows: Vec<R> = sqlx::query_as(&select)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
        let total: i64 = sqlx::query_scalar(&count).fetch_one(pool).await?;
        let items = rows.into_iter().map(T::from).collect();
        return Ok(SearchPage::new(items, total, offset, SearchMethod::Legacy));
    }

    if req.use_full_text {
        let tokens = sanitize_tokens(query);
        // Everything sanitized away: an empty result, never an unranked scan.
        if tokens.is_empty() {
            return Ok(SearchPage::empty(SearchMethod::FullText));
        }
        let expression = tsquery_expression(&tokens);
        let (select, count) = fulltext_sql();
        let ranked: Result<(Vec<R>, i64), sqlx::Error> = async {
            let rows: Vec<R> = sqlx::query_as(&select)
                .bind(&expression)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?;
            let total: i64 = sqlx::query_scalar(&count).bind(&expression).fetch_one(pool).await?;
            Ok((rows, total))
        }
        .await;
        match ranked {
            Ok((rows, total)) => {
                let items = rows.into_iter().map(T::from).collect();
                return Ok(SearchPage::new(items, total, offset, SearchMethod::FullText));
            }
            Err(e) => {
                warn!(error = %e, query, "full-text search failed, falling back to legacy");
            }
        }
    }

    let token_patterns = legacy_token_patterns(query);
    let (select, count) = legacy_sql(token_patterns.len());
    let query_pattern = like_pattern(query);

    let mut select_query = sqlx::query_as::<_, R>(&select).bind(&query_pattern);
    for pattern in &token_patterns {
        select_query = select_query.bind(pattern);
    }
    let rows: Vec<R> = select_query.bind(limit).bind(offset).fetch_all(pool).await?;

    let mut count_query = sqlx::query_scalar::<_, i64>(&count).bind(&query_pattern);
    for pattern in &token_patterns {
        count_query = count_query.bind(pattern);
    }
    let total: i64 = count_query.fetch_one(pool).await?;

    let items = rows.into_iter().map(T::from).collect();
    Ok(SearchPage::new(items, total, offset, SearchMethod::Legacy))
}
