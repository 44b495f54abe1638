pub mod audio;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod events;
pub mod library;
pub mod logging;
pub mod models;
pub mod queue;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::*;
pub use models::*;
