//! Wire protocol between a supervisor and its workers.
//!
//! Messages travel as newline-delimited JSON, one tagged object per line:
//!
//! ```text
//! supervisor ──► worker            worker ──► supervisor
//!   {"type":"heartbeat","timestamp":T}   {"type":"started"}
//!   {"type":"stop"}                      {"type":"error","message":"..."}
//!   {"type":"message","payload":…}       {"type":"request"}
//!                                        {"type":"message","payload":…}
//! ```
//!
//! ## Contents
//! - [`Outbound`], [`Inbound`] the two directions of the channel
//! - [`encode_line`], [`decode_line`] framing and boundary validation
//! - [`LineReader`] size-bounded, cancel-safe frame reader

mod codec;
mod message;
mod reader;

pub use codec::{MAX_LINE_BYTES, decode_line, encode_line};
pub use reader::LineReader;
pub use message::{Inbound, ORPHAN_MESSAGE, Outbound};
