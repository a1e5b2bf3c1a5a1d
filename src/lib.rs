pub mod bridge;
pub mod builtin;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod logger;
pub mod registry;
pub mod schema;
