//! Data model for streamed text.

/// Frames and character counting.
pub mod frame;

pub use frame::{Frame, char_len};
