//! # respkit-proto - RESP2/RESP3 wire codec
//!
//! Purpose: Turn command argument lists into RESP request frames and turn the
//! server's byte stream back into `Reply` values. Nothing here performs
//! network I/O or holds shared state.
//!
//! ## Design Principles
//! 1. **Pure Functions**: Encoding and decoding are plain functions over buffers.
//! 2. **Incremental Decoding**: `decode` reports "need more bytes" instead of blocking,
//!    so blocking and async transports share one parser.
//! 3. **Binary-Safe**: Bulk payloads are raw bytes and are never interpreted.
//! 4. **Errors Are Data**: A RESP error reply decodes to `Reply::Error`; only
//!    malformed framing is a `ProtocolError`.

pub mod decode;
pub mod encode;
pub mod error;
pub mod reply;

pub use decode::{decode, decode_buffered, read_reply, DecodeLimits, FrameScanner, ReadError};
pub use encode::{encode_command, encode_reply};
pub use error::ProtocolError;
pub use reply::Reply;
