//! Scrollback - bounded terminal history buffers
//!
//! Three leaf components used by the session layer:
//!
//! - [`RingBuffer`]: fixed-capacity circular store of structured line events.
//! - [`RawReplayBuffer`]: byte-capped FIFO of raw terminal output for exact
//!   visual replay on reconnect.
//! - [`LineBuffer`]: transforms arbitrarily chopped raw byte chunks into
//!   clean display lines, preserving color (SGR) escapes and stripping all
//!   other control sequences.
//!
//! All three are pure data structures; timers and I/O live with the caller.

mod ansi;
mod line_buffer;
mod raw_replay;
mod ring;

pub use ansi::scrub_ansi;
pub use line_buffer::LineBuffer;
pub use raw_replay::RawReplayBuffer;
pub use ring::RingBuffer;
