// src/lib.rs

pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod routes;
pub mod session;
pub mod state;
pub mod timer;
pub mod utils;
pub mod worker;

// Re-export specific items for convenience if needed
pub use routes::create_router;
