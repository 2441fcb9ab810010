//! Registry of open client connections
//!
//! This module tracks one connection per user and owns every write to a
//! client socket:
//! - Registration, replacement of a reconnecting user and teardown
//! - Unicast and broadcast of encoded frames
//! - Detection and removal of dead connections by a periodic sweep
//!
//! Writes to one connection are serialized behind that connection's own lock
//! and bounded by a timeout, so a slow client only ever delays itself.

use futures_util::future::join_all;
use futures_util::{Sink, SinkExt};
use log::{debug, info};
use shared::UserId;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};

use dashmap::DashMap;

/// Write half of a client transport.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// A single registered connection
///
/// A user that reconnects gets a new `Client` with a new `connection_id`;
/// the id is what tells a stale teardown apart from the live connection.
pub struct Client {
    /// Identity the connection was admitted under
    pub user_id: UserId,
    /// Unique per accepted socket, never reused
    pub connection_id: u64,
    pub connected_at: Instant,
    sink: Mutex<FrameSink>,
    open: AtomicBool,
    send_timeout: Duration,
}

impl Client {
    fn new(user_id: UserId, connection_id: u64, sink: FrameSink, send_timeout: Duration) -> Self {
        Self {
            user_id,
            connection_id,
            connected_at: Instant::now(),
            sink: Mutex::new(sink),
            open: AtomicBool::new(true),
            send_timeout,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Flags the connection as dead without touching the socket.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Writes one binary frame
    ///
    /// Returns false if the connection was already closed or the write failed
    /// or timed out. A failed write marks the connection closed so the sweep
    /// can collect it.
    pub async fn send(&self, frame: Vec<u8>) -> bool {
        if !self.is_open() {
            return false;
        }

        let mut sink = self.sink.lock().await;
        self.write(&mut sink, frame).await
    }

    async fn write(&self, sink: &mut FrameSink, frame: Vec<u8>) -> bool {
        // The connection may have died while we waited for the lock
        if !self.is_open() {
            return false;
        }

        match timeout(self.send_timeout, sink.send(Message::Binary(frame))).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Send to user {} failed: {}", self.user_id, e);
                self.mark_closed();
                false
            }
            Err(_) => {
                debug!(
                    "Send to user {} timed out after {:?}",
                    self.user_id, self.send_timeout
                );
                self.mark_closed();
                false
            }
        }
    }

    /// Marks the connection closed and shuts down its transport.
    pub async fn close(&self) {
        self.mark_closed();
        let mut sink = self.sink.lock().await;
        if let Ok(Err(e)) = timeout(self.send_timeout, sink.close()).await {
            debug!("Closing connection for user {} failed: {}", self.user_id, e);
        }
    }
}

/// Concurrent map of user id to live connection
///
/// The number of registered connections is the user count reported to
/// clients.
pub struct ClientManager {
    clients: DashMap<UserId, Arc<Client>>,
    next_connection_id: AtomicU64,
    send_timeout: Duration,
}

impl ClientManager {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    fn new_client(&self, user_id: UserId, sink: FrameSink) -> Arc<Client> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(Client::new(
            user_id,
            connection_id,
            sink,
            self.send_timeout,
        ))
    }

    /// Inserts `client`, replacing any connection the user already had. The
    /// replaced connection is marked closed at once and its transport shut
    /// down in the background.
    fn register(&self, client: &Arc<Client>) {
        let user_id = client.user_id;
        if let Some(previous) = self.clients.insert(user_id, Arc::clone(client)) {
            info!(
                "User {} reconnected, closing superseded connection {}",
                user_id, previous.connection_id
            );
            previous.mark_closed();
            tokio::spawn(async move { previous.close().await });
        } else {
            info!("User {} connected ({} online)", user_id, self.len());
        }
    }

    /// Registers a connection for `user_id`
    pub fn connect(&self, user_id: UserId, sink: FrameSink) -> Arc<Client> {
        let client = self.new_client(user_id, sink);
        self.register(&client);
        client
    }

    /// Registers a connection and writes `greeting` as its first frame
    ///
    /// The connection's write lock is held from registration until the
    /// greeting is written, so broadcasts that see the new connection queue
    /// up behind it. `greeting` runs after registration and may count the
    /// new connection. Returns the client and whether the greeting was sent.
    pub async fn join<F, Fut>(
        &self,
        user_id: UserId,
        sink: FrameSink,
        greeting: F,
    ) -> (Arc<Client>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<u8>>,
    {
        let client = self.new_client(user_id, sink);
        let mut sink = client.sink.lock().await;
        self.register(&client);

        let frame = greeting().await;
        let sent = client.write(&mut sink, frame).await;
        drop(sink);

        (client, sent)
    }

    /// Removes `client` if it is still the registered connection for its
    /// user. Returns whether anything was removed.
    pub fn disconnect(&self, client: &Client) -> bool {
        client.mark_closed();
        let removed = self
            .clients
            .remove_if(&client.user_id, |_, current| {
                current.connection_id == client.connection_id
            })
            .is_some();

        if removed {
            info!("User {} disconnected ({} online)", client.user_id, self.len());
        }
        removed
    }

    pub fn get(&self, user_id: UserId) -> Option<Arc<Client>> {
        self.clients.get(&user_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.clients.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn open_clients(&self) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Sends `frame` to every open connection concurrently
    ///
    /// Closed connections are skipped. Returns the number of successful
    /// writes.
    pub async fn broadcast(&self, frame: &[u8]) -> usize {
        let clients = self.open_clients();
        if clients.is_empty() {
            return 0;
        }

        let results = join_all(clients.iter().map(|client| client.send(frame.to_vec()))).await;
        results.into_iter().filter(|sent| *sent).count()
    }

    pub async fn send_to(&self, user_id: UserId, frame: Vec<u8>) -> bool {
        match self.get(user_id) {
            Some(client) => client.send(frame).await,
            None => false,
        }
    }

    /// Removes and closes every connection that is no longer open
    ///
    /// Returns the users whose connections were collected.
    pub async fn sweep(&self) -> Vec<UserId> {
        let stale: Vec<Arc<Client>> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_open())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut removed = Vec::new();
        for client in stale {
            if self.disconnect(&client) {
                client.close().await;
                removed.push(client.user_id);
            }
        }

        if !removed.is_empty() {
            info!("Swept {} dead connections", removed.len());
        }
        removed
    }
}
