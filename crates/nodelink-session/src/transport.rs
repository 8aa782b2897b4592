//! Outbound byte transport seam.
//!
//! The WebSocket client/server lives outside this crate; sessions only need
//! "send these bytes as one message".

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::{Result, SessionError};

/// One-message-at-a-time outbound transport.
pub trait Transport: Send {
    /// Sends `message` as a single transport message.
    fn send(&self, message: &[u8]) -> Result<()>;
}

/// Transport backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelTransport {
    /// Creates the transport and the receiving end of its channel.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: &[u8]) -> Result<()> {
        self.tx
            .send(message.to_vec())
            .map_err(|_| SessionError::Transport {
                reason: "channel closed".to_string(),
            })
    }
}

/// Transport that records every message, for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingTransport {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything sent so far.
    pub fn take(&self) -> Vec<Vec<u8>> {
        match self.sent.lock() {
            Ok(mut sent) => std::mem::take(&mut *sent),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: &[u8]) -> Result<()> {
        let mut sent = self.sent.lock().map_err(|_| SessionError::Transport {
            reason: "recorder poisoned".to_string(),
        })?;
        sent.push(message.to_vec());
        Ok(())
    }
}
