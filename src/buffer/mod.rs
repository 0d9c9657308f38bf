//! Pooled Line Buffers
//!
//! This module owns every byte that crosses a socket. Inbound bytes are
//! appended to a per-connection input buffer and cut into lines; outbound
//! reply text is encoded into a queue of fixed-capacity buffers that the
//! writer task drains.
//!
//! ## Architecture
//!
//! ```text
//!   socket bytes                               reply text
//!        │                                         │
//!        ▼                                         ▼
//! ┌──────────────┐   lines   ┌────────────┐   ┌──────────┐
//! │  LineFramer  │──────────>│  Protocol  │──>│  encode  │
//! │ (input buf)  │           │   layer    │   │ (charset)│
//! └──────┬───────┘           └────────────┘   └────┬─────┘
//!        │ acquire / recycle                       │ acquire
//!        ▼                                         ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      BufferPool                         │
//! │        free list of fixed-capacity PooledBuffers        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Buffers move between owners by value. A buffer is either in the free
//! list, in a connection's input slot, in a pending-line queue or in an
//! output queue, never in two places at once.

pub mod charset;
pub mod framer;
pub mod pool;

pub use charset::Charset;
pub use framer::{encode, LineFramer, PADDING_BYTE};
pub use pool::{BufferPool, PoolStats, PooledBuffer, DEFAULT_BUFFER_CAPACITY};
