//! Notifications shared between widget instances on the same page.

use tokio::sync::broadcast;

const CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetSignal {
    /// An instance saved the owner's record.
    RecordUpdated { owner_ref: String, origin: u64 },
}

#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<WidgetSignal>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    /// Returns how many listeners received the signal.
    pub fn publish(&self, signal: WidgetSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WidgetSignal> {
        self.tx.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
