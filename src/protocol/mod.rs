//! Protocol capability set.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → Reader::read (framing, one instance per connection)
//!     → Packet (owned payload + declared size + close flag)
//!     → Eventer::on_message (application logic)
//!     → Connection::send(Packet)
//! ```
//!
//! # Design Decisions
//! - The core defines no wire format; framing belongs to the Reader
//! - Two equivalent styles: trait objects via ProtocolManager, or Callbacks closures
//! - Packets own their storage so queued packets never alias a read buffer

pub mod callbacks;
pub mod chunk;
pub mod hooks;
pub mod packet;

pub use callbacks::Callbacks;
pub use chunk::ChunkReader;
pub use hooks::{BoxError, Eventer, ProtocolManager, ReadStream, Reader};
pub use packet::Packet;
