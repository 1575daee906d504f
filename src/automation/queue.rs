// Queue runner: several scripts in sequence on one worker task
use super::control::{RunControl, RunState};
use super::interpreter::ScriptProgram;
use super::program::{MacroContext, run_program};
use crate::adb::Device;
use crate::events::EngineEvent;
use crate::store;
use crate::toolkit::Toolkit;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

fn default_repeats() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub path: PathBuf,
    #[serde(default = "default_repeats")]
    pub repeats: u32,
}

impl QueueItem {
    pub fn new(path: impl Into<PathBuf>, repeats: u32) -> Self {
        Self {
            path: path.into(),
            repeats,
        }
    }
}

/// Stop and pause flags of a queue plus the control of whichever sub-run is
/// active. A pause that lands between sub-runs holds the queue before the next
/// one starts.
#[derive(Default)]
pub struct QueueControl {
    stop_requested: AtomicBool,
    paused: AtomicBool,
    finished: AtomicBool,
    current: Mutex<Option<Arc<RunControl>>>,
}

impl QueueControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<RunControl>>> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Stops the queue and forwards the request to the active sub-run.
    pub fn stop(&self) -> bool {
        let first = !self.stop_requested.swap(true, Ordering::SeqCst);
        if let Some(control) = self.current() {
            control.stop();
        }
        first
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// True while the queue is held between sub-runs.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<Arc<RunControl>> {
        self.lock().clone()
    }

    /// Pauses the active sub-run, or holds the queue if it is between runs.
    pub fn pause(&self) -> bool {
        if self.is_finished() || self.is_stop_requested() {
            return false;
        }
        let current = self.lock();
        match current.as_ref() {
            Some(control) if control.state().is_active() => control.pause(),
            _ => !self.paused.swap(true, Ordering::SeqCst),
        }
    }

    pub fn resume(&self) -> bool {
        let held = self.paused.swap(false, Ordering::SeqCst);
        let resumed = self.current().is_some_and(|c| c.resume());
        held || resumed
    }

    /// The sub-run's state while one is active; otherwise PAUSED or RUNNING
    /// depending on the queue's own flag; STOPPED once the queue is done.
    pub fn state(&self) -> RunState {
        if self.is_finished() {
            return RunState::Stopped;
        }
        match self.current().map(|c| c.state()) {
            Some(state) if state.is_active() => state,
            _ if self.is_paused() => RunState::Paused,
            _ => RunState::Running,
        }
    }

    /// Installs the next sub-run unless a pause arrived first.
    fn install(&self, control: &Arc<RunControl>) -> bool {
        let mut current = self.lock();
        if self.is_paused() {
            return false;
        }
        *current = Some(control.clone());
        // A stop that raced the hand-over must still reach the new run.
        if self.is_stop_requested() {
            control.stop();
        }
        true
    }

    /// Waits out a queue-level pause. Returns `false` once the queue is stopped.
    async fn hold(&self, slice: Duration) -> bool {
        while self.is_paused() && !self.is_stop_requested() {
            sleep(slice).await;
        }
        !self.is_stop_requested()
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Runs every item `repeats` times, the whole list `total_repeats` times.
/// Items whose script cannot be loaded or has no steps are skipped.
pub async fn run_queue<D: Device>(
    toolkit: Arc<Toolkit<D>>,
    items: Vec<QueueItem>,
    total_repeats: u32,
    queue: Arc<QueueControl>,
) {
    let events = toolkit.events.clone();
    let rounds = total_repeats.max(1);
    let mut started_any = false;

    info!("📋 Queue started: {} items x{rounds}", items.len());
    'rounds: for round in 1..=rounds {
        if rounds > 1 {
            info!("📋 Queue round {round}/{rounds}");
        }
        for (index, item) in items.iter().enumerate() {
            if queue.is_stop_requested() {
                break 'rounds;
            }
            let script = match store::load_script(&item.path) {
                Ok(script) => script,
                Err(e) => {
                    warn!("⚠️ Queue item {} skipped: {e}", index + 1);
                    continue;
                }
            };
            if script.steps.is_empty() {
                warn!("⚠️ Queue item {} skipped: '{}' has no steps", index + 1, script.name);
                continue;
            }

            let repetitions = item.repeats.max(1);
            for repetition in 1..=repetitions {
                if started_any && !gap(&toolkit, &queue).await {
                    break 'rounds;
                }
                if queue.is_stop_requested() {
                    break 'rounds;
                }
                started_any = true;

                let control = Arc::new(RunControl::new(script.name.clone(), events.clone()));
                loop {
                    if !queue.hold(toolkit.engine.pause_poll()).await {
                        break 'rounds;
                    }
                    if queue.install(&control) {
                        break;
                    }
                }
                events.publish(EngineEvent::QueueProgress {
                    index,
                    name: script.name.clone(),
                    repetition,
                    repetitions,
                });
                info!(
                    "▶️ Queue [{}/{}] {} ({repetition}/{repetitions})",
                    index + 1,
                    items.len(),
                    script.name
                );
                let ctx = MacroContext::new(toolkit.clone(), control);
                run_program(ScriptProgram::new(script.clone()), ctx).await;
            }
        }
    }

    queue.finish();
    info!("📋 Queue finished");
    events.publish(EngineEvent::QueueFinished);
}

/// Pause between consecutive runs; a queue-level pause freezes it.
/// Returns `false` if the queue was stopped.
async fn gap<D: Device>(toolkit: &Toolkit<D>, queue: &QueueControl) -> bool {
    let slice = toolkit.engine.pause_poll();
    let mut remaining = toolkit.engine.queue_gap();
    while !remaining.is_zero() {
        if !queue.hold(slice).await {
            return false;
        }
        let step = slice.min(remaining);
        sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
    !queue.is_stop_requested()
}
