pub mod logging;

pub use logging::{init_logging, LOG_ENV};
