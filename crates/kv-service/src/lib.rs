//! A minimal TCP front end over an ordered, concurrent in-memory key/value store.
//!
//! See [`Config`] for how the service is tuned, [`protocol`] for the wire format it speaks, and
//! [`Service`] for how to start and stop it.

mod config;
mod error;
pub mod protocol;
mod server;

pub use self::config::Config;
pub use self::error::ServiceError;
pub use self::server::Service;
