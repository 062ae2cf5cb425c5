//! REST API module for health checks and metrics scraping

mod dto;
mod handlers;
mod server;

pub use dto::HealthResponse;
pub use server::{router, run_server};
