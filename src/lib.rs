pub mod crypto;
pub mod downloader;
pub mod error;
pub mod facts;
pub mod logger;
pub mod origin;
pub mod playlist;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod subtitle;
pub mod token;
pub mod utils;

pub use error::{Error, Result};
pub use reqwest;
