// Engine notifications for observers (CLI, tests, a future GUI)
use crate::automation::RunState;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged {
        name: String,
        from: RunState,
        to: RunState,
    },
    RunStarted {
        name: String,
    },
    RunFinished {
        name: String,
        state: RunState,
        loops: u64,
    },
    RunError {
        name: String,
        message: String,
    },
    StepChanged {
        index: usize,
        name: String,
    },
    Click {
        x: u32,
        y: u32,
    },
    QueueProgress {
        index: usize,
        name: String,
        repetition: u32,
        repetitions: u32,
    },
    QueueFinished,
    BackgroundStarted {
        enabled: usize,
    },
    BackgroundStopped,
    BackgroundFired {
        index: usize,
        name: String,
    },
}

/// Fan-out of [`EngineEvent`]s over unbounded channels.
///
/// Publishing never blocks; receivers that have been dropped are pruned on the
/// next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: EngineEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<EngineEvent>>> {
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner())
    }
}
