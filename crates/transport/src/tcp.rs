//! Raw TCP adapter.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::{Incoming, Transport, TransportError};

/// Read buffer size for a single `recv` (64 KB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A TCP stream exchanging unframed bytes.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    buf: Box<[u8]>,
}

impl TcpTransport {
    /// Wraps an accepted stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Opens an outbound connection.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self::new(stream, peer))
    }
}

impl Transport for TcpTransport {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        let n = self.stream.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(Incoming::Closed);
        }
        Ok(Incoming::Chunk(self.buf[..n].to_vec()))
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
