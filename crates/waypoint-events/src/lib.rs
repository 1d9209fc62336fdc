//! Typed event envelopes and a synchronous pub/sub bus for the Waypoint
//! runtime (spec §4.10). The bus deliberately skips `tokio::sync::broadcast`,
//! which gives every subscriber an independent, async, best-effort feed:
//! the contract here calls for synchronous, in-order delivery with isolated
//! handler failures — closer to a classic Node-style `EventEmitter`.

pub mod bus;
pub mod envelope;
pub mod legacy;

pub use bus::{EventBus, Handler, HandlerError, SubscriptionId};
pub use envelope::{EventEnvelope, EventSource, ENVELOPE_VERSION};
pub use legacy::{normalize_legacy_event, normalize_legacy_type, nullish_coalesce_default};
