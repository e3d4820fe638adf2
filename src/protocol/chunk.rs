//! Passthrough reader that frames nothing.

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::protocol::{Packet, ReadStream, Reader};

/// Default read buffer size.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Returns whatever a single socket read produced as one packet.
///
/// The scratch buffer is reused across reads, but every packet gets its own
/// copy of the bytes, so queued packets never alias the next read.
#[derive(Debug)]
pub struct ChunkReader {
    buf: Vec<u8>,
}

impl ChunkReader {
    /// A reader that reads at most `chunk_size` bytes per packet.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buf: vec![0; chunk_size.max(1)],
        }
    }
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[async_trait]
impl Reader for ChunkReader {
    async fn read(&mut self, stream: &mut ReadStream) -> std::io::Result<Packet> {
        let n = stream.read(&mut self.buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            ));
        }
        Ok(Packet::new(self.buf[..n].to_vec()))
    }
}
