//! Backend for the odekake family spot/event discovery app.
//!
//! The interesting parts live in [`cache`] (stale-while-revalidate store with
//! single-flight refresh dedup) and [`data::search`] (ranked full-text search
//! with a substring fallback). The rest is a thin axum shell.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod fetch;
pub mod logging;
pub mod state;
pub mod web;
