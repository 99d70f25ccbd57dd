pub mod codec;
pub mod coalesce;
pub mod config;
pub mod domain;
pub mod error;
pub mod metadata;
pub mod output;
pub mod source;
pub mod store;
