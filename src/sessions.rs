use std::{collections::HashMap, fmt, sync::Arc};

use tokio::{
    select,
    sync::{Mutex, mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{Error, Result},
    types::ContractId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Editor,
    Downloader,
    Session,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Editor => write!(f, "editor"),
            SessionKind::Downloader => write!(f, "downloader"),
            SessionKind::Session => write!(f, "session"),
        }
    }
}

type InvalidationRequest = oneshot::Sender<()>;

struct Slot {
    kind: SessionKind,
    tx: mpsc::Sender<InvalidationRequest>,
}

/// An open upload, download or edit session bound to one contract.
///
/// The owner must poll [`Session::check`] between operations (or await
/// [`Session::invalidated`]) so that a pending renewal can proceed.
pub struct Session {
    contract_id: ContractId,
    kind: SessionKind,
    rx: mpsc::Receiver<InvalidationRequest>,
    invalid: bool,
}

impl Session {
    pub fn contract_id(&self) -> ContractId {
        self.contract_id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    /// Acknowledges any pending invalidation. Returns an error once the
    /// session has been invalidated.
    pub fn check(&mut self) -> Result<()> {
        if !self.invalid {
            if let Ok(ack) = self.rx.try_recv() {
                self.invalidate(ack);
            }
        }
        if self.invalid {
            return Err(Error::SessionInvalidated(self.contract_id));
        }
        Ok(())
    }

    /// Resolves when an invalidation request arrives, acknowledging it.
    pub async fn invalidated(&mut self) {
        if self.invalid {
            return;
        }
        if let Some(ack) = self.rx.recv().await {
            self.invalidate(ack);
        } else {
            self.invalid = true;
        }
    }

    fn invalidate(&mut self, ack: InvalidationRequest) {
        self.invalid = true;
        self.rx.close();
        let _ = ack.send(());
        debug!("Invalidated {} for contract {}", self.kind, self.contract_id);
    }
}

/// Open sessions per contract.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    slots: Arc<Mutex<HashMap<ContractId, Vec<Slot>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, contract_id: ContractId, kind: SessionKind) -> Session {
        let (tx, rx) = mpsc::channel(1);
        let mut slots = self.slots.lock().await;
        let entry = slots.entry(contract_id).or_default();
        entry.retain(|slot| !slot.tx.is_closed());
        entry.push(Slot { kind, tx });
        Session {
            contract_id,
            kind,
            rx,
            invalid: false,
        }
    }

    pub async fn open_count(&self, contract_id: &ContractId) -> usize {
        self.slots
            .lock()
            .await
            .get(contract_id)
            .map_or(0, |slots| slots.iter().filter(|s| !s.tx.is_closed()).count())
    }

    /// Invalidates every session bound to `contract_id`, blocking until each
    /// owner acknowledges or drops its session. A session stays registered
    /// until it has acknowledged, so a cancelled call leaves the rest open.
    /// Returns `Error::Cancelled` if `cancel_token` fires first.
    pub async fn invalidate(
        &self,
        contract_id: &ContractId,
        cancel_token: &CancellationToken,
    ) -> Result<()> {
        loop {
            let next = self
                .slots
                .lock()
                .await
                .get(contract_id)
                .and_then(|slots| slots.first())
                .map(|slot| (slot.kind, slot.tx.clone()));
            let Some((kind, tx)) = next else {
                return Ok(());
            };

            let (ack_tx, ack_rx) = oneshot::channel();
            debug!("Waiting for {} invalidation: {}", kind, contract_id);
            let sent = select! {
                sent = tx.send(ack_tx) => sent.is_ok(),
                _ = cancel_token.cancelled() => return Err(Error::Cancelled),
            };
            if sent {
                select! {
                    // A dropped or closed session counts as acknowledged.
                    _ = ack_rx => {}
                    _ = tx.closed() => {}
                    _ = cancel_token.cancelled() => return Err(Error::Cancelled),
                }
                debug!("Got {} invalidation: {}", kind, contract_id);
            }
            self.remove(contract_id, &tx).await;
        }
    }

    async fn remove(&self, contract_id: &ContractId, tx: &mpsc::Sender<InvalidationRequest>) {
        let mut slots = self.slots.lock().await;
        if let Some(entry) = slots.get_mut(contract_id) {
            entry.retain(|slot| !slot.tx.same_channel(tx));
            if entry.is_empty() {
                slots.remove(contract_id);
            }
        }
    }
}
