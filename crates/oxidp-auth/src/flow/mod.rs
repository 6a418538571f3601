//! The interactive flow engine.
//!
//! A hierarchical state machine drives every interactive flow. Each state
//! carries meta — a stable [`Intent`], the UI capabilities it needs, and its
//! actions — and the per-step [`UiContract`] is serialized directly from that
//! meta. Clients branch on `intent`, never on `state`: the state name is an
//! implementation detail and may change between releases.
//!
//! Guards reference only data already present in the [`FlowContext`];
//! permission checks are computed upstream (consent service, policy
//! resolver) and arrive as precomputed booleans.

mod contract;
mod engine;
mod intent;

pub use contract::{ClientDisplay, UiContext, UiContract, UiError};
pub use engine::{AuthStep, FlowContext, FlowEvent, FlowState, advance, apply_event, meta};
pub use intent::{Action, Actions, Capability, CapabilityKind, Intent, Stability, StateMeta};
