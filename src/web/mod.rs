//! Web API module for the odekake application.

pub mod error;
pub mod routes;
pub mod search;
pub mod status;

pub use routes::*;
