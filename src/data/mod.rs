//! Database models and search queries.

pub mod models;
pub mod search;
