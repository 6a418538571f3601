//! # oxidp-server
//!
//! Server wiring for the OxIdP OpenID Provider: configuration loading,
//! component bootstrap, router assembly, and the listener.

pub mod bootstrap;
pub mod config;
pub mod server;

pub use bootstrap::{Adapters, DevBackchannelNotifier, DevEmailSender, Runtime, build};
pub use config::{ContractSeed, ServerConfig};
pub use server::{app_router, serve};
