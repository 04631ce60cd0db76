//! Webhook/trigger adapters
//!
//! Decodes inbound HTTP-shaped messages into the mediator's trigger
//! payload. Signed/encrypted provider callbacks go through a two-phase
//! handshake (GET verification with a decrypted echo, POST delivery with
//! verify-then-decrypt); every verification or decryption failure is
//! rejected here and never reaches the engine.

mod adapter;
mod hmac_hook;
mod schedule;
mod suite;

pub use adapter::{
    check_method, AdapterSet, HookAdapter, HookOutcome, InboundRequest, PlainAdapter,
};
pub use hmac_hook::{compute_body_signature, HmacAdapter};
pub use schedule::IntervalSchedule;
pub use suite::SuiteAdapter;
