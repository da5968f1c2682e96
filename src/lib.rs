pub mod bitrate;
pub mod config;
pub mod dashboard;
pub mod discovery;
pub mod downloader;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod pool;
pub mod process;
pub mod progress;

pub use error::{AppError, ExitCategory};
