//! Interlock common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all Interlock
//! components.

pub mod config;
pub mod datetime;
pub mod error;
pub mod fixstr;
pub mod hash;

pub use config::{EngineConfig, StorageConfig, NODE_CACHE_BYTES};
pub use datetime::{Date, DateTime, Time, MINUTES_PER_DAY};
pub use error::{InterlockError, Result};
pub use fixstr::{FixedStr, MailAddr, Password, RealName, Station, TrainName, Username};
pub use hash::{id_of, Id};
