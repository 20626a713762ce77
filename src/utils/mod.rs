//! # Utility Modules
//!
//! Supporting utilities shared by every transport.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Async timeout wrappers and default intervals

pub mod logging;
pub mod metrics;
pub mod timeout;
