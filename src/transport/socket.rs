//! Raw stream over a non-blocking TCP socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use super::{ByteStream, Capabilities, Readiness};
use crate::error::{ProtocolError, Result};

/// Bottom layer of a network session. Reads and writes go straight to the
/// socket with `try_read`/`try_write` and never wait.
pub struct SocketStream {
    socket: Arc<TcpStream>,
}

impl SocketStream {
    pub fn new(socket: TcpStream) -> Self {
        Self {
            socket: Arc::new(socket),
        }
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::Socket(self.socket.clone())
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.peer_addr()?)
    }
}

impl ByteStream for SocketStream {
    fn capabilities(&self) -> Capabilities {
        Capabilities::DUPLEX
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.socket.try_read(buf) {
            Ok(0) => Err(ProtocolError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        Ok(self.socket.try_write(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_socket_roundtrip_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let stream = SocketStream::new(server);
        let readiness = stream.readiness();

        let mut buf = [0u8; 4];
        assert!(matches!(stream.read(&mut buf), Err(ProtocolError::WouldBlock)));

        client.write_all(b"ping").await.unwrap();
        readiness.readable().await.unwrap();
        let mut got = 0;
        while got < 4 {
            match stream.read(&mut buf[got..]) {
                Ok(n) => got += n,
                Err(ProtocolError::WouldBlock) => readiness.readable().await.unwrap(),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(&buf, b"ping");

        readiness.writable().await.unwrap();
        assert_eq!(stream.write(b"pong").unwrap(), 4);
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");

        drop(client);
        loop {
            readiness.readable().await.unwrap();
            match stream.read(&mut buf) {
                Err(ProtocolError::ConnectionClosed) => break,
                Err(ProtocolError::WouldBlock) => continue,
                other => panic!("expected close, got {other:?}"),
            }
        }
    }
}
