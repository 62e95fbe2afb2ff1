pub mod config;
pub mod error;
pub mod models;
pub mod publish;
pub mod store;

pub use error::{PublishError, ValidationError};
pub use publish::{render, Publisher};
