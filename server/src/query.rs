//! Query endpoint: one UDP binding served by one responder

use crate::bind::{BindingError, UdpBinding};
use log::{debug, error, info};
use shared::QueryResponder;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A live query endpoint and the task reading from it
pub struct QueryEndpoint {
    binding: Arc<UdpBinding>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl QueryEndpoint {
    /// Binds `addr` and starts answering datagrams with `responder`.
    pub async fn start(
        addr: SocketAddr,
        responder: Box<dyn QueryResponder>,
        read_size: usize,
    ) -> io::Result<Self> {
        let binding = Arc::new(UdpBinding::bind(addr).await?);
        let local_addr = binding.local_addr()?;
        info!(
            "query endpoint listening on {} ({})",
            local_addr,
            responder.protocol()
        );

        let task = tokio::spawn(handle_queries(
            Arc::clone(&binding),
            responder,
            read_size,
        ));

        Ok(Self {
            binding,
            task,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the binding and waits for the read loop to finish, releasing
    /// the port.
    pub async fn shutdown(self) {
        self.binding.close();
        if let Err(e) = self.task.await {
            error!("query loop panicked: {}", e);
        }
    }
}

/// Reads datagrams until the binding closes, answering each with `responder`.
///
/// Responder and write errors drop the datagram; only a closed binding ends
/// the loop.
pub async fn handle_queries(
    binding: Arc<UdpBinding>,
    mut responder: Box<dyn QueryResponder>,
    read_size: usize,
) {
    let mut buf = vec![0u8; read_size.max(1)];

    loop {
        let (len, from) = match binding.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(BindingError::Closed) => break,
            Err(e) => {
                error!("read from udp: {}", e);
                continue;
            }
        };

        let resp = match responder.respond(from, &buf[..len]) {
            Ok(resp) => resp,
            Err(e) => {
                error!("error responding to query from {}: {}", from, e);
                continue;
            }
        };

        match binding.send_to(&resp, from).await {
            Ok(_) => {}
            Err(BindingError::Closed) => break,
            Err(e) => error!("error writing response to {}: {}", from, e),
        }
    }

    debug!("query loop stopped");
}
