//! # oxidp-core
//!
//! Shared kernel for the OxIdP OpenID Provider.
//!
//! This crate provides:
//! - Core error types shared across the workspace
//! - Time handling (millisecond-precision internal clock, second-precision claims)
//! - Cryptographically random identifier generation
//! - The structured event bus (pre/post hooks) used for audit and integrations
//!
//! ## Modules
//!
//! - [`error`] - Core error types
//! - [`time`] - Timestamp newtypes and conversions
//! - [`id`] - Random identifier generation
//! - [`events`] - Event bus, envelopes, and hook traits

pub mod error;
pub mod events;
pub mod id;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    EventBus, EventContext, EventEnvelope, HookError, PostHook, PreHook, names as event_names,
};
pub use id::{generate_id, generate_kid, generate_otp, generate_user_code};
pub use time::UnixMillis;
