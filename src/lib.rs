pub mod chain;
pub mod config;
pub mod error;
#[cfg(feature = "fake")]
pub mod fake;
pub mod lightning;
pub mod logging;
pub mod messages;
pub mod policy;
pub mod swap;

pub use config::SwapServiceConfig;
pub use error::SwapError;
