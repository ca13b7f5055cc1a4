//! Message channels to the external control process.
//!
//! Each channel is a named, independent bidirectional stream. Request
//! channels (`config`, `execute`, `safe_execute`) carry inbound JSON
//! payloads and get no structured reply; the general-purpose `communicate`
//! channel lets the engine push notification events outward and await a
//! single acknowledgement under a bounded deadline.

use crate::error::ChannelError;
use crate::poll::bounded_future;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// One end of a named channel.
#[async_trait]
pub trait Comm: Send + Sync {
    fn target(&self) -> &str;

    /// Push a message to the peer.
    async fn send(&self, payload: Value) -> Result<(), ChannelError>;

    /// Receive the next inbound message from the peer.
    async fn recv(&self) -> Result<Value, ChannelError>;
}

/// In-process channel implementation over tokio mpsc pairs.
pub struct MpscComm {
    target: String,
    outbound: mpsc::UnboundedSender<Value>,
    inbound: Mutex<mpsc::UnboundedReceiver<Value>>,
}

/// The control-process side of an in-process channel pair.
pub struct ControlEnd {
    outbound: mpsc::UnboundedSender<Value>,
    inbound: Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl ControlEnd {
    /// Send a message toward the engine.
    pub fn send(&self, payload: Value) -> Result<(), ChannelError> {
        self.outbound
            .send(payload)
            .map_err(|_| ChannelError::Closed("control".to_string()))
    }

    /// Next message the engine pushed outward.
    pub async fn recv(&self) -> Option<Value> {
        self.inbound.lock().await.recv().await
    }

    /// Drain without waiting; `None` when nothing is pending.
    pub fn try_recv(&self) -> Option<Value> {
        self.inbound.try_lock().ok().and_then(|mut rx| rx.try_recv().ok())
    }
}

/// Build a connected channel pair for the given target name.
pub fn channel_pair(target: impl Into<String>) -> (MpscComm, ControlEnd) {
    let (to_control, from_engine) = mpsc::unbounded_channel();
    let (to_engine, from_control) = mpsc::unbounded_channel();
    (
        MpscComm {
            target: target.into(),
            outbound: to_control,
            inbound: Mutex::new(from_control),
        },
        ControlEnd {
            outbound: to_engine,
            inbound: Mutex::new(from_engine),
        },
    )
}

#[async_trait]
impl Comm for MpscComm {
    fn target(&self) -> &str {
        &self.target
    }

    async fn send(&self, payload: Value) -> Result<(), ChannelError> {
        self.outbound
            .send(payload)
            .map_err(|_| ChannelError::Closed(self.target.clone()))
    }

    async fn recv(&self) -> Result<Value, ChannelError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| ChannelError::Closed(self.target.clone()))
    }
}

/// Outbound notifications over the `communicate` channel.
pub struct Messenger {
    comm: Arc<dyn Comm>,
    ack_timeout: Duration,
}

impl Messenger {
    pub fn new(comm: Arc<dyn Comm>, ack_timeout: Duration) -> Self {
        Self { comm, ack_timeout }
    }

    /// Push a notification event and await a single acknowledgement within
    /// the deadline.
    pub async fn notify(&self, event: &str, data: Value) -> Result<Value, ChannelError> {
        self.comm
            .send(json!({ "event": event, "data": data }))
            .await?;

        match bounded_future(self.comm.recv(), self.ack_timeout).await {
            Some(ack) => {
                debug!(event, "notification acknowledged");
                ack
            }
            None => Err(ChannelError::Timeout(self.comm.target().to_string())),
        }
    }

    /// Best-effort variant: failures (unreachable or silent control process)
    /// are logged and swallowed.
    pub async fn notify_best_effort(&self, event: &str, data: Value) {
        if let Err(err) = self.notify(event, data).await {
            warn!(event, error = %err, "best-effort notification failed");
        }
    }
}
