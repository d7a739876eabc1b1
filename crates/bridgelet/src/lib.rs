//! bridgelet: secure request/response bridge between a trusted host and
//! embedded guest content.
//!
//! Two symmetric peers exchange authenticated envelopes over a raw,
//! one-directional-each-way post primitive that guarantees ordering but
//! offers no request/response pairing and no authentication. The bridge
//! layers correlation on top (a monotonic id per request, consumed by the
//! matching `responseID`), authenticates every envelope with a per-instance
//! secret token, and keeps the untrusted side behind a single frozen entry
//! point.
//!
//! # Architecture
//!
//! - **protocol**: envelope model, secret token, reserved control channels
//! - **codec**: shape classification and serialization
//! - **pending**: request/response correlation table
//! - **registry**: named handlers and the one-shot reply capability
//! - **guest**: the untrusted-side peer
//! - **host**: the trusted-side peer, network proxy, script composition
//! - **compositor**: injected guest runtime assembly
//!
//! Registries and pending tables are owned by their local peer and mutated
//! only from that peer's own dispatch turns; the raw channel is the only
//! synchronization point between peers.

pub mod codec;
pub mod pending;
pub mod protocol;
pub mod registry;

mod compositor;
mod fetch;
mod guest;
mod host;

pub use compositor::{
    ContentScript, InjectedUnit, InjectionPhase, ScriptId, ScriptRegistrar, UnitId,
};
pub use guest::{FetchOutcome, GuestBridge, GuestEntryPoint, MessagePoster};
pub use host::{GUEST_ENTRY_INVOCATION, GuestEvaluator, HostBridge, HostBridgeConfig};
pub use pending::{PendingResponses, ResponseCallback};
pub use protocol::{Body, Control, Envelope, ReservedName, SecretToken, SendError};
pub use registry::{Handler, HandlerRegistry, Responder};
