//! In-memory transport
//!
//! An address-keyed fabric of mpsc channels with UDP-like semantics:
//! datagrams to unknown addresses are silently dropped, delivery is
//! fire-and-forget. Multi-peer tests run on this instead of real sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::socket::{Socket, TransportError};
use super::wire::Packet;

/// A registry of local endpoints sharing one simulated network.
#[derive(Default)]
pub struct LocalNetwork {
    endpoints: Mutex<HashMap<String, mpsc::UnboundedSender<Packet>>>,
    next_port: AtomicU32,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(HashMap::new()),
            next_port: AtomicU32::new(1),
        })
    }

    /// Open a socket on this network. A trailing `:0` port gets a fresh
    /// address assigned, mirroring OS bind behavior.
    pub fn open(self: &Arc<Self>, address: &str) -> LocalSocket {
        let addr = match address.strip_suffix(":0") {
            Some(host) => {
                let port = self.next_port.fetch_add(1, Ordering::SeqCst);
                format!("{host}:{port}")
            }
            None => address.to_string(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.lock().unwrap().insert(addr.clone(), tx);
        LocalSocket {
            addr,
            network: Arc::clone(self),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn deliver(&self, dest: &str, packet: Packet) {
        let endpoints = self.endpoints.lock().unwrap();
        if let Some(tx) = endpoints.get(dest) {
            let _ = tx.send(packet);
        }
    }
}

pub struct LocalSocket {
    addr: String,
    network: Arc<LocalNetwork>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

#[async_trait]
impl Socket for LocalSocket {
    fn local_addr(&self) -> String {
        self.addr.clone()
    }

    async fn send(
        &self,
        dest: &str,
        packet: &Packet,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.network.deliver(dest, packet.clone());
        Ok(())
    }

    async fn recv(&self, recv_timeout: Duration) -> Result<Option<Packet>, TransportError> {
        let mut rx = self.rx.lock().await;
        match timeout(recv_timeout, rx.recv()).await {
            Ok(Some(packet)) => Ok(Some(packet)),
            Ok(None) | Err(_) => Ok(None),
        }
    }
}
