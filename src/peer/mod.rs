//! The peer
//!
//! Ties the subsystems together: the op log and submission path, the gossip
//! view, the routing table, and the socket. A started peer runs one
//! listener task plus optional heartbeat and anti-entropy tickers; each
//! outbound broadcast spawns a short-lived ack-wait task. All long-lived
//! tasks select on a shared shutdown channel.

pub mod routing;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::config::PeerConfig;
use crate::crdt::{
    compile_document, stamp_batch, CrdtError, CrdtOperation, CrdtState, DocumentOps, Editor,
};
use crate::gossip::View;
use crate::snapshot::SnapshotStore;
use crate::transport::{
    AckMessage, CrdtOperationsMessage, Header, Message, Packet, Rumor, RumorsMessage, Socket,
    StatusMessage, TransportError,
};

use routing::RoutingTable;

/// Per-call socket timeout; doubles as the listener's shutdown poll period.
const IO_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("no route to {0}")]
    Unroutable(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Crdt(#[from] CrdtError),

    #[error("snapshot store not configured")]
    SnapshotsDisabled,

    #[error("snapshot store error: {0}")]
    Snapshot(#[from] std::io::Error),
}

pub struct Peer {
    config: PeerConfig,
    socket: Arc<dyn Socket>,
    address: String,
    routing: RoutingTable,
    view: View,
    editor: Editor,
    crdt_state: CrdtState,
    /// Pending ack waiters by packet ID. Lock order: this map is always
    /// taken and released before any socket send, never across one.
    acks: Mutex<HashMap<Uuid, oneshot::Sender<()>>>,
    snapshots: Option<SnapshotStore>,
    shutdown: broadcast::Sender<()>,
}

impl Peer {
    /// Returns `Arc<Self>` because the background tasks hold references.
    pub fn new(config: PeerConfig, socket: Arc<dyn Socket>) -> Arc<Self> {
        let address = socket.local_addr();
        let routing = RoutingTable::new();
        routing.set_entry(&address, &address);

        let snapshots = config.document_dir.clone().map(|dir| {
            SnapshotStore::new(dir, config.doc_timestamp_threshold, config.doc_queue_size)
        });

        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            socket,
            address,
            routing,
            view: View::new(),
            editor: Editor::new(),
            crdt_state: CrdtState::new(),
            acks: Mutex::new(HashMap::new()),
            snapshots,
            shutdown,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the listener and the configured tickers.
    pub async fn start(self: &Arc<Self>) -> Result<(), PeerError> {
        self.spawn_listener();

        if self.config.heartbeat_interval > Duration::ZERO {
            self.broadcast(Message::Empty).await?;
            self.spawn_heartbeat();
        }
        if self.config.anti_entropy_interval > Duration::ZERO {
            self.spawn_anti_entropy();
        }
        Ok(())
    }

    /// Signal every background task to stop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    fn spawn_listener(self: &Arc<Self>) {
        let peer = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = peer.socket.recv(IO_TIMEOUT) => match result {
                        Ok(Some(packet)) => peer.handle_packet(packet).await,
                        Ok(None) => {}
                        Err(e) => log::error!("{}: receive failed: {e}", peer.address),
                    },
                    _ = shutdown.recv() => break,
                }
            }
            log::debug!("{}: listener stopped", peer.address);
        });
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let peer = Arc::clone(self);
        let interval = self.config.heartbeat_interval;
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = peer.broadcast(Message::Empty).await {
                            log::warn!("{}: heartbeat failed: {e}", peer.address);
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_anti_entropy(self: &Arc<Self>) {
        let peer = Arc::clone(self);
        let interval = self.config.anti_entropy_interval;
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Some(neighbor) = peer.routing.random_neighbor(&[peer.address.as_str()]) {
                            let status = Message::Status(peer.view.status());
                            peer.send_direct(&neighbor, status).await;
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Wrap a payload in a sequence-stamped rumor, push it to one random
    /// neighbor, and deliver it locally.
    pub async fn broadcast(self: &Arc<Self>, message: Message) -> Result<(), PeerError> {
        let sequence = self.view.next_rumor_seq();
        let rumor = Rumor {
            origin: self.address.clone(),
            sequence,
            payload: Box::new(message.clone()),
        };
        self.view.record(rumor.clone());
        let rumors = RumorsMessage {
            rumors: vec![rumor],
        };

        if let Some(neighbor) = self.routing.random_neighbor(&[self.address.as_str()]) {
            let packet = Packet {
                header: Header::new(self.address.as_str(), self.address.as_str(), neighbor.as_str()),
                message: Message::Rumors(rumors.clone()),
            };
            let packet_id = packet.header.packet_id;

            // Register the waiter before sending so a fast ack cannot race
            // the timer setup.
            let ack_rx = (self.config.ack_timeout > Duration::ZERO).then(|| {
                let (tx, rx) = oneshot::channel();
                self.acks.lock().unwrap().insert(packet_id, tx);
                rx
            });

            if let Err(e) = self.socket.send(&neighbor, &packet, IO_TIMEOUT).await {
                log::warn!("{}: broadcast to {neighbor} failed: {e}", self.address);
            }
            if let Some(ack_rx) = ack_rx {
                self.spawn_ack_wait(packet_id, ack_rx, rumors, neighbor);
            }
        }

        // Self-delivery: the local replica consumes the payload directly,
        // having already recorded its own rumor.
        let header = Header::new(self.address.as_str(), self.address.as_str(), self.address.as_str());
        self.dispatch(&header, message).await;
        Ok(())
    }

    /// Send a message along the routing table to `dest`.
    pub async fn unicast(&self, dest: &str, message: Message) -> Result<(), PeerError> {
        let hop = self
            .routing
            .next_hop(dest)
            .ok_or_else(|| PeerError::Unroutable(dest.to_string()))?;
        let packet = Packet {
            header: Header::new(self.address.as_str(), self.address.as_str(), dest),
            message,
        };
        self.socket.send(&hop, &packet, IO_TIMEOUT).await?;
        Ok(())
    }

    /// One retransmission to a fresh neighbor if the ack does not arrive
    /// in time; anti-entropy covers anything beyond that.
    fn spawn_ack_wait(
        self: &Arc<Self>,
        packet_id: Uuid,
        ack_rx: oneshot::Receiver<()>,
        rumors: RumorsMessage,
        first_dest: String,
    ) {
        let peer = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = ack_rx => {}
                _ = tokio::time::sleep(peer.config.ack_timeout) => {
                    let exclude = [peer.address.as_str(), first_dest.as_str()];
                    if let Some(neighbor) = peer.routing.random_neighbor(&exclude) {
                        log::debug!(
                            "{}: no ack for {packet_id}, retransmitting to {neighbor}",
                            peer.address
                        );
                        peer.send_direct(&neighbor, Message::Rumors(rumors)).await;
                    }
                }
                _ = shutdown.recv() => {}
            }
            peer.acks.lock().unwrap().remove(&packet_id);
        });
    }

    /// Build a packet addressed to `dest` and put it on the wire. Send
    /// failures are logged, not surfaced; anti-entropy recovers.
    async fn send_direct(&self, dest: &str, message: Message) {
        let packet = Packet {
            header: Header::new(self.address.as_str(), self.address.as_str(), dest),
            message,
        };
        if let Err(e) = self.socket.send(dest, &packet, IO_TIMEOUT).await {
            log::warn!("{}: send to {dest} failed: {e}", self.address);
        }
    }

    // ------------------------------------------------------------------
    // Inbound path
    // ------------------------------------------------------------------

    async fn handle_packet(self: &Arc<Self>, packet: Packet) {
        if packet.header.destination == self.address {
            let Packet { header, message } = packet;
            self.dispatch(&header, message).await;
        } else {
            self.relay(packet).await;
        }
    }

    /// Forward a packet not addressed to us toward its destination.
    async fn relay(&self, mut packet: Packet) {
        packet.header.relayed_by = self.address.clone();
        match self.routing.next_hop(&packet.header.destination) {
            Some(hop) => {
                if let Err(e) = self.socket.send(&hop, &packet, IO_TIMEOUT).await {
                    log::warn!("{}: relay to {hop} failed: {e}", self.address);
                }
            }
            None => log::warn!(
                "{}: no route to {}, dropping packet",
                self.address,
                packet.header.destination
            ),
        }
    }

    /// Boxed so rumor payloads can feed back through the same dispatch.
    fn dispatch<'a>(
        self: &'a Arc<Self>,
        header: &'a Header,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match message {
                Message::Rumors(msg) => self.on_rumors(header, msg).await,
                Message::Status(status) => self.on_status(&header.source, &status).await,
                Message::Ack(ack) => self.on_ack(&header.source, ack).await,
                Message::CrdtOperations(msg) => self.update_editor(&msg.operations),
                Message::Empty => {}
            }
        })
    }

    async fn on_rumors(self: &Arc<Self>, header: &Header, msg: RumorsMessage) {
        let mut expected = false;
        for rumor in &msg.rumors {
            if !self.view.record(rumor.clone()) {
                continue;
            }
            expected = true;

            // A rumor relayed on behalf of another origin teaches us the
            // route back to that origin.
            if rumor.origin != header.relayed_by {
                self.routing.set_entry(&rumor.origin, &header.relayed_by);
            }

            let payload = (*rumor.payload).clone();
            self.dispatch(header, payload).await;
        }

        let ack = Message::Ack(AckMessage {
            acked_packet_id: header.packet_id,
            status: self.view.status(),
        });
        self.send_direct(&header.source, ack).await;

        // Keep the epidemic going: pass expected rumors to a neighbor that
        // has not just sent them to us.
        if expected {
            let exclude = [self.address.as_str(), header.source.as_str()];
            if let Some(neighbor) = self.routing.random_neighbor(&exclude) {
                self.send_direct(&neighbor, Message::Rumors(msg)).await;
            }
        }
    }

    async fn on_status(self: &Arc<Self>, source: &str, remote: &StatusMessage) {
        let local = self.view.status();
        let remote_has_more = remote
            .iter()
            .any(|(origin, &seq)| local.get(origin).copied().unwrap_or(0) < seq);
        let missing = self.view.missing_for(remote);

        if remote_has_more {
            // We are behind: ask for a catch-up by showing our own vector.
            self.send_direct(source, Message::Status(local.clone())).await;
        }
        if !missing.is_empty() {
            // The remote is behind: replay what it lacks.
            let catch_up = Message::Rumors(RumorsMessage { rumors: missing });
            self.send_direct(source, catch_up).await;
        } else if !remote_has_more {
            let p = self.config.continue_mongering;
            if p > 0.0 && rand::random::<f64>() <= p {
                let exclude = [self.address.as_str(), source];
                if let Some(neighbor) = self.routing.random_neighbor(&exclude) {
                    self.send_direct(&neighbor, Message::Status(local)).await;
                }
            }
        }
    }

    async fn on_ack(self: &Arc<Self>, source: &str, ack: AckMessage) {
        if let Some(waiter) = self.acks.lock().unwrap().remove(&ack.acked_packet_id) {
            let _ = waiter.send(());
        }
        // The piggybacked vector is a normal status exchange.
        self.on_status(source, &ack.status).await;
    }

    // ------------------------------------------------------------------
    // Routing API
    // ------------------------------------------------------------------

    /// Register direct neighbors. Our own address is ignored.
    pub fn add_peer<I, S>(&self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for addr in addrs {
            let addr = addr.as_ref();
            if addr == self.address {
                log::debug!("{}: not adding self as a peer", self.address);
                continue;
            }
            if !self.routing.contains(addr) {
                self.routing.set_entry(addr, addr);
            }
        }
    }

    pub fn set_routing_entry(&self, origin: &str, relay: &str) {
        self.routing.set_entry(origin, relay);
    }

    pub fn routing_table(&self) -> HashMap<String, String> {
        self.routing.snapshot()
    }

    // ------------------------------------------------------------------
    // CRDT API
    // ------------------------------------------------------------------

    /// Stamp a client batch with authoritative IDs and gossip it out. The
    /// local editor learns about it through broadcast self-delivery, so a
    /// failed rewrite leaves the log untouched.
    pub async fn save_transactions(
        self: &Arc<Self>,
        mut operations: Vec<CrdtOperation>,
    ) -> Result<(), PeerError> {
        stamp_batch(&mut operations, &self.address, &self.crdt_state)?;
        let message = Message::CrdtOperations(CrdtOperationsMessage { operations });
        self.broadcast(message).await
    }

    /// Append delivered operations to the op log. Public for the dispatch
    /// path and for tests.
    pub fn update_editor(&self, ops: &[CrdtOperation]) {
        self.editor.update(ops);
    }

    pub fn document_ops(&self, doc_id: &str) -> DocumentOps {
        self.editor.document_ops(doc_id)
    }

    pub fn block_ops(&self, doc_id: &str, block_id: &str) -> Vec<CrdtOperation> {
        self.editor.block_ops(doc_id, block_id)
    }

    /// Highest authoritative sequence assigned locally for a document.
    pub fn crdt_state(&self, doc_id: &str) -> u64 {
        self.crdt_state.get(doc_id)
    }

    /// Fold the document's op log into its serialized block tree.
    pub fn compile(&self, doc_id: &str) -> Result<String, CrdtError> {
        let ops = self.editor.document_ops(doc_id);
        if ops.is_empty() {
            return Err(CrdtError::DocumentNotFound(doc_id.to_string()));
        }
        compile_document(&ops)
    }

    /// Snapshot a compiled document to the configured directory.
    pub fn store_document(&self, doc_id: &str, document: &str) -> Result<(), PeerError> {
        match &self.snapshots {
            Some(store) => Ok(store.store(doc_id, document)?),
            None => Err(PeerError::SnapshotsDisabled),
        }
    }
}
