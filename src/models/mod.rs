//! Data model
//!
//! Wire-facing types for frames, player state and event envelopes.
//! Frames arrive from loosely-typed camera firmware, so decoding is
//! tolerant: a missing or wrongly-typed field becomes absent instead of
//! failing the whole record.

mod event;
mod frame;
mod player;

pub use event::{EventEnvelope, EventType};
pub use frame::{FaceDetection, Frame};
pub use player::{ContentRef, PlayerState};
