//! Prioritized HTTP router with composable middleware, built on
//! `chain-core`'s path model and wire types.

pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod response;
pub mod route;
pub mod router;
pub mod server;

pub use config::ChainConfig;
pub use context::RequestContext;
pub use error::{RouterError, RouterResult};
pub use route::{Handler, Middleware, Next};
pub use router::Router;
