#![doc = include_str!("../README.md")]

pub mod cli;
pub mod config;
pub mod error;
pub mod feedback;
pub mod pacing;
pub mod proxy;
pub mod retry;
pub mod selectors;
pub mod urls;

pub use config::Config;
pub use error::{ErrorKind, QuarryError, Result};
pub use feedback::{FeedbackRecord, FeedbackStore};
pub use pacing::Pacer;
pub use proxy::{PoolSource, ProxyManager};
pub use retry::{retry_with, RetryPolicy};
pub use selectors::{LocalFsStore, SelectorRecord, SelectorStore};
