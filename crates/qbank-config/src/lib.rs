//! Configuration, paths, and logging setup shared by the QBank crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_API_URL, DEFAULT_CLIENT_ID, DEFAULT_HTTP_TIMEOUT_SECS,
    DEFAULT_IDENTITY_ENDPOINT, DEFAULT_LOG_LEVEL, DEFAULT_REFRESH_MARGIN_SECS,
    DEFAULT_RESUME_TIMEOUT_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
