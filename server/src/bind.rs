//! Closable UDP socket wrapper for the query endpoint

use log::debug;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;

/// Deadline applied to every reply written by the query endpoint
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("binding closed")]
    Closed,
    #[error("write deadline exceeded")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A UDP socket with an explicit closed state
///
/// Once closed, every receive and send fails with [`BindingError::Closed`],
/// including a receive that was already waiting. The socket itself is released
/// when the last handle is dropped.
#[derive(Debug)]
pub struct UdpBinding {
    socket: UdpSocket,
    closed: watch::Sender<bool>,
}

impl UdpBinding {
    /// Binds a UDP socket on `addr`; port 0 picks a free port.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let (closed, _) = watch::channel(false);
        Ok(Self { socket, closed })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for a datagram, returning its length and sender.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), BindingError> {
        // Subscribe before checking so a close in between is still observed
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(BindingError::Closed);
        }

        tokio::select! {
            _ = closed.changed() => Err(BindingError::Closed),
            res = self.socket.recv_from(buf) => match res {
                Ok(received) => Ok(received),
                Err(_) if self.is_closed() => Err(BindingError::Closed),
                Err(e) => Err(BindingError::Io(e)),
            },
        }
    }

    /// Sends one datagram, giving up after [`WRITE_TIMEOUT`].
    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, BindingError> {
        if self.is_closed() {
            return Err(BindingError::Closed);
        }

        match timeout(WRITE_TIMEOUT, self.socket.send_to(buf, target)).await {
            Ok(Ok(sent)) => Ok(sent),
            Ok(Err(_)) if self.is_closed() => Err(BindingError::Closed),
            Ok(Err(e)) => Err(BindingError::Io(e)),
            Err(_) => Err(BindingError::Timeout),
        }
    }

    /// Marks the binding closed and wakes any waiting receive. Idempotent.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!("query binding closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    async fn local_binding() -> UdpBinding {
        UdpBinding::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_bind_lifecycle() {
        let binding = local_binding().await;
        assert!(!binding.is_closed());
        let endpoint = binding.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hello bind", endpoint).await.unwrap();

        let mut buf = [0u8; 32];
        let (len, from) = binding.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello bind");
        assert_eq!(from, client.local_addr().unwrap());

        assert_ok!(binding.send_to(b"reply", from).await);
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"reply");

        binding.close();
        assert!(binding.is_closed());
    }

    #[tokio::test]
    async fn test_close_interrupts_blocked_receive() {
        let binding = Arc::new(local_binding().await);

        let reader = {
            let binding = Arc::clone(&binding);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                binding.recv_from(&mut buf).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        binding.close();

        let result = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("receive did not return after close")
            .unwrap();
        assert!(matches!(result, Err(BindingError::Closed)));
    }

    #[tokio::test]
    async fn test_closed_binding_fails_deterministically() {
        let binding = local_binding().await;
        let target = binding.local_addr().unwrap();
        binding.close();
        binding.close();

        let mut buf = [0u8; 4];
        assert!(matches!(
            binding.recv_from(&mut buf).await,
            Err(BindingError::Closed)
        ));
        assert!(matches!(
            binding.send_to(b"x", target).await,
            Err(BindingError::Closed)
        ));
    }
}
