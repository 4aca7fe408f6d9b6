use super::{MsgPack, MsgStream};
use crate::core::{MetaError, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// In-process ordered stream for a single channel.
///
/// Packs are delivered in produce order. Producing never blocks, so the
/// scheduler worker cannot stall on a slow consumer.
pub struct InMemoryMsgStream {
    channel: String,
    tx: mpsc::UnboundedSender<MsgPack>,
    rx: Mutex<mpsc::UnboundedReceiver<MsgPack>>,
    available: AtomicBool,
    closed: CancellationToken,
}

impl InMemoryMsgStream {
    pub fn new(channel: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            channel: channel.into(),
            tx,
            rx: Mutex::new(rx),
            available: AtomicBool::new(true),
            closed: CancellationToken::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Toggle fault injection: when unavailable, `produce` fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl MsgStream for InMemoryMsgStream {
    async fn produce(&self, pack: MsgPack) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(MetaError::Unavailable(format!("stream '{}' is closed", self.channel)));
        }
        if !self.available.load(Ordering::SeqCst) {
            warn!("produce to '{}' rejected: stream unavailable", self.channel);
            return Err(MetaError::Unavailable(format!("stream '{}' unreachable", self.channel)));
        }
        debug!("produce {} msgs to '{}'", pack.len(), self.channel);
        self.tx.send(pack)?;
        Ok(())
    }

    async fn consume(&self) -> Result<Option<MsgPack>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            pack = rx.recv() => Ok(pack),
            _ = self.closed.cancelled() => {
                rx.close();
                Ok(rx.try_recv().ok())
            }
        }
    }

    async fn try_consume(&self) -> Result<Option<MsgPack>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.try_recv().ok())
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
