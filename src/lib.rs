//! Spinfeed - real-time roulette spin feed client
//!
//! One push-stream connection plus a polling safety net feed a deduplicated,
//! bounded cache of roulette tables that any number of subscribers observe.

pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::{AccessCredential, StreamClient, Subscription};
pub use types::*;
