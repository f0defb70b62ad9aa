pub mod audit;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod rate_limiter;
pub mod redemption;
pub mod scan;
pub mod scheduler;
pub mod server;
pub mod signature;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{create_app, Server};
