//! Policy resolution.
//!
//! Composes a tenant contract with a client contract into an immutable
//! per-flow [`ResolvedPolicy`]. Resolution happens exactly once per new
//! challenge; the result is pinned inside the challenge record and no later
//! component re-reads the contracts for that flow.

mod registry;
mod resolved;
mod resolver;

pub use registry::ContractRegistry;
pub use resolved::{FlowNode, ResolvedPolicy};
pub use resolver::PolicyResolver;
