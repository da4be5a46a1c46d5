//! Line protocol spoken with the agent process.
//!
//! One UTF-8 JSON object per line, newline-terminated, in both directions.
//!
//! - `codec`: [`LineCodec`](codec::LineCodec) framing with partial-line
//!   buffering across chunk boundaries.
//! - `inbound`: decoding of agent lines into [`InboundMessage`](inbound::InboundMessage)s.
//! - `outbound`: construction of user messages, control requests, and
//!   prompt answers.
//! - `writer`: the single task that owns the agent's stdin.

pub mod codec;
pub mod inbound;
pub mod outbound;
pub mod writer;
