//! Macro engine: owns the single active-run slot.
//!
//! Starting anything (a program, a script or a queue) first stops and joins
//! whatever is active, so at most one macro worker task exists at a time. The
//! background scheduler is separate and runs beside it.

use super::control::{RunControl, RunSnapshot, RunState};
use super::error::{MacroError, MacroResult};
use super::interpreter::ScriptProgram;
use super::program::{MacroContext, MacroProgram, run_program};
use super::queue::{QueueControl, QueueItem, run_queue};
use super::script::Script;
use crate::adb::Device;
use crate::toolkit::Toolkit;
use log::{info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

#[derive(Clone)]
enum RunTarget {
    Single(Arc<RunControl>),
    Queue(Arc<QueueControl>),
}

impl RunTarget {
    fn control(&self) -> Option<Arc<RunControl>> {
        match self {
            RunTarget::Single(control) => Some(control.clone()),
            RunTarget::Queue(queue) => queue.current(),
        }
    }

    fn stop(&self) -> bool {
        match self {
            RunTarget::Single(control) => control.stop(),
            RunTarget::Queue(queue) => queue.stop(),
        }
    }

    fn pause(&self) -> bool {
        match self {
            RunTarget::Single(control) => control.pause(),
            RunTarget::Queue(queue) => queue.pause(),
        }
    }

    fn resume(&self) -> bool {
        match self {
            RunTarget::Single(control) => control.resume(),
            RunTarget::Queue(queue) => queue.resume(),
        }
    }

    fn state(&self) -> RunState {
        match self {
            RunTarget::Single(control) => control.state(),
            RunTarget::Queue(queue) => queue.state(),
        }
    }
}

struct ActiveRun {
    name: String,
    target: RunTarget,
    handle: Option<JoinHandle<()>>,
}

pub struct MacroEngine<D: Device> {
    toolkit: Arc<Toolkit<D>>,
    active: Mutex<Option<ActiveRun>>,
    // Held across stop, join and install so concurrent starts and stops
    // cannot interleave and orphan a worker.
    switching: AsyncMutex<()>,
}

impl<D: Device> MacroEngine<D> {
    pub fn new(toolkit: Arc<Toolkit<D>>) -> Self {
        Self {
            toolkit,
            active: Mutex::new(None),
            switching: AsyncMutex::new(()),
        }
    }

    pub fn toolkit(&self) -> &Arc<Toolkit<D>> {
        &self.toolkit
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn target(&self) -> Option<RunTarget> {
        self.lock().as_ref().map(|run| run.target.clone())
    }

    fn ensure_connected(&self) -> MacroResult<()> {
        if self.toolkit.device.is_connected() {
            Ok(())
        } else {
            Err(MacroError::NotConnected)
        }
    }

    /// Starts `program` on a new worker task, replacing any active run.
    pub async fn start<P>(&self, program: P) -> MacroResult<Arc<RunControl>>
    where
        P: MacroProgram<D> + 'static,
    {
        self.ensure_connected()?;
        let _switching = self.switching.lock().await;
        self.stop_active().await;

        let name = program.name().to_string();
        let control = Arc::new(RunControl::new(name.clone(), self.toolkit.events.clone()));
        self.toolkit.humanizer.reset_session();

        let ctx = MacroContext::new(self.toolkit.clone(), control.clone());
        let handle = tokio::spawn(async move {
            run_program(program, ctx).await;
        });
        info!("🚀 Macro started: {name}");
        *self.lock() = Some(ActiveRun {
            name,
            target: RunTarget::Single(control.clone()),
            handle: Some(handle),
        });
        Ok(control)
    }

    pub async fn start_script(&self, script: Script) -> MacroResult<Arc<RunControl>> {
        if script.steps.is_empty() {
            return Err(MacroError::EmptyScript(script.name));
        }
        self.start(ScriptProgram::new(script)).await
    }

    pub async fn start_queue(
        &self,
        items: Vec<QueueItem>,
        total_repeats: u32,
    ) -> MacroResult<Arc<QueueControl>> {
        self.ensure_connected()?;
        let _switching = self.switching.lock().await;
        self.stop_active().await;

        let queue = Arc::new(QueueControl::new());
        self.toolkit.humanizer.reset_session();
        let handle = tokio::spawn(run_queue(
            self.toolkit.clone(),
            items,
            total_repeats,
            queue.clone(),
        ));
        *self.lock() = Some(ActiveRun {
            name: "queue".to_string(),
            target: RunTarget::Queue(queue.clone()),
            handle: Some(handle),
        });
        Ok(queue)
    }

    pub fn pause(&self) -> bool {
        let paused = self.target().is_some_and(|t| t.pause());
        if paused {
            info!("⏸️ Macro paused");
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.target().is_some_and(|t| t.resume());
        if resumed {
            info!("▶️ Macro resumed");
        }
        resumed
    }

    pub fn toggle_pause(&self) -> bool {
        match self.state() {
            RunState::Running => self.pause(),
            RunState::Paused => self.resume(),
            _ => false,
        }
    }

    /// Requests a stop and joins the worker, aborting it after the join timeout.
    /// Waits for any start in progress, then stops the run it installed.
    pub async fn stop(&self) {
        let _switching = self.switching.lock().await;
        self.stop_active().await;
    }

    async fn stop_active(&self) {
        let Some((name, target, handle)) = self
            .lock()
            .as_mut()
            .map(|run| (run.name.clone(), run.target.clone(), run.handle.take()))
        else {
            return;
        };
        if target.stop() {
            info!("⏹️ Stop requested: {name}");
        }
        let Some(mut handle) = handle else {
            return;
        };
        let limit = self.toolkit.engine.join_timeout();
        if timeout(limit, &mut handle).await.is_err() {
            warn!("⚠️ {name} did not stop within {limit:?}, aborting");
            handle.abort();
        }
    }

    pub fn state(&self) -> RunState {
        self.target().map_or(RunState::Idle, |t| t.state())
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Snapshot of the active run, or of the queue's active sub-run.
    pub fn snapshot(&self) -> Option<RunSnapshot> {
        self.target()
            .and_then(|t| t.control())
            .map(|c| c.snapshot())
    }

    pub fn current_name(&self) -> Option<String> {
        self.lock().as_ref().map(|run| run.name.clone())
    }

    /// Waits until the active worker task has exited.
    pub async fn wait(&self) {
        loop {
            let finished = self.lock().as_ref().is_none_or(|run| {
                run.handle.as_ref().is_none_or(|h| h.is_finished())
            });
            if finished {
                return;
            }
            sleep(self.toolkit.engine.pause_poll()).await;
        }
    }
}
