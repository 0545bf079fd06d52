// src/core/upstream/registry.rs

//! Tracks the upstream connections currently held by proxy sessions so a
//! promotion can sever them all in one step.
//!
//! The registry is an index, not an owner: it keeps ids, weak writer
//! references, and kill channels, and never extends a connection's
//! lifetime. Each tracked connection removes itself on close.

use crate::core::BerylError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::broadcast;
use tracing::debug;

type SharedWriter = Arc<AsyncMutex<OwnedWriteHalf>>;

struct RegistryEntry {
    writer: Weak<AsyncMutex<OwnedWriteHalf>>,
    kill_tx: broadcast::Sender<()>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    entries: HashMap<u64, RegistryEntry>,
}

/// The set of live proxied upstream connections, keyed by a monotonically
/// increasing id.
#[derive(Default)]
pub struct UpstreamRegistry {
    inner: Mutex<RegistryInner>,
}

/// What `register` hands back: the tracked connection plus the pieces the
/// session distributes to its tasks. The kill receivers are created before
/// the entry is published, so a racing `close_all` cannot fire past them.
pub struct RegisteredUpstream {
    pub handle: TrackedUpstream,
    pub reader: OwnedReadHalf,
    pub serve_kill: broadcast::Receiver<()>,
    pub pump_kill: broadcast::Receiver<()>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits `stream` and tracks it. The returned handle owns the write
    /// half; the registry keeps only a weak reference to it.
    pub fn register(self: Arc<Self>, stream: TcpStream) -> RegisteredUpstream {
        let (reader, writer) = stream.into_split();
        let writer = Arc::new(AsyncMutex::new(writer));
        let (kill_tx, serve_kill) = broadcast::channel(1);
        let pump_kill = kill_tx.subscribe();

        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.entries.insert(
                id,
                RegistryEntry {
                    writer: Arc::downgrade(&writer),
                    kill_tx: kill_tx.clone(),
                },
            );
            id
        };
        debug!(upstream_id = id, "registered upstream connection");

        RegisteredUpstream {
            handle: TrackedUpstream {
                id,
                registry: self,
                writer,
                kill_tx,
            },
            reader,
            serve_kill,
            pump_kill,
        }
    }

    /// Severs every registered connection and empties the map.
    ///
    /// Kill signals fire first so serve loops blocked on an idle client
    /// socket wake up, then each still-live writer is shut down so that
    /// in-flight forwards fail instead of landing on the old primary.
    /// Safe against concurrent `register` and `close` calls; each entry is
    /// severed exactly once.
    pub async fn close_all(&self) {
        let entries: Vec<RegistryEntry> = {
            let mut inner = self.inner.lock();
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };
        debug!(count = entries.len(), "severing all registered upstream connections");
        for entry in &entries {
            let _ = entry.kill_tx.send(());
        }
        for entry in entries {
            if let Some(writer) = entry.writer.upgrade() {
                let _ = writer.lock().await.shutdown().await;
            }
        }
    }

    fn remove(&self, id: u64) -> bool {
        self.inner.lock().entries.remove(&id).is_some()
    }
}

/// One registered upstream connection, owned by exactly one proxy session.
pub struct TrackedUpstream {
    id: u64,
    registry: Arc<UpstreamRegistry>,
    writer: SharedWriter,
    kill_tx: broadcast::Sender<()>,
}

impl TrackedUpstream {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Writes raw frame bytes to the upstream. Fails once the connection
    /// has been severed.
    pub async fn write_all(&self, bytes: &[u8]) -> Result<(), BerylError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        Ok(())
    }

    /// Closes the connection and removes it from the registry. Idempotent,
    /// including against a concurrent `close_all`.
    pub async fn close(&self) {
        if self.registry.remove(self.id) {
            debug!(upstream_id = self.id, "deregistered upstream connection");
        }
        let _ = self.kill_tx.send(());
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl Drop for TrackedUpstream {
    fn drop(&mut self) {
        // The socket halves close when their owners drop them; the map
        // entry must not outlive the connection.
        self.registry.remove(self.id);
        let _ = self.kill_tx.send(());
    }
}
