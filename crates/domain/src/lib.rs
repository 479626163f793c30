pub mod capability;
pub mod chat;
pub mod config;
pub mod error;
pub mod message;
pub mod settings;
pub mod stream;
pub mod trace;

pub use error::{Error, Result};
