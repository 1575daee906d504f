// Run lifecycle state shared between a worker task and its controllers
use crate::events::{EngineEvent, EventBus};
use log::info;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
    Error,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Running,
            2 => RunState::Paused,
            3 => RunState::Stopped,
            4 => RunState::Error,
            _ => RunState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Paused => 2,
            RunState::Stopped => 3,
            RunState::Error => 4,
        }
    }

    /// Running or paused.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Stopped | RunState::Error)
    }
}

/// Point-in-time view of a run for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub state: RunState,
    pub step_index: usize,
    pub retry_count: u32,
    pub loop_count: u64,
    pub elapsed: Duration,
}

/// Control block of one run.
///
/// Transitions are compare-and-swap on an atomic, so `pause`, `resume` and
/// `stop` can be called from any task while the worker polls `state()`.
/// STOPPED and ERROR are terminal; every run gets a fresh control.
pub struct RunControl {
    name: String,
    state: AtomicU8,
    step_index: AtomicUsize,
    retry_count: AtomicU32,
    loop_count: AtomicU64,
    window: Mutex<(Option<Instant>, Option<Instant>)>,
    events: EventBus,
}

impl RunControl {
    pub fn new(name: impl Into<String>, events: EventBus) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(RunState::Idle.as_u8()),
            step_index: AtomicUsize::new(0),
            retry_count: AtomicU32::new(0),
            loop_count: AtomicU64::new(0),
            window: Mutex::new((None, None)),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    fn transition(&self, from: &[RunState], to: RunState) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let state = RunState::from_u8(current);
            if !from.contains(&state) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                to.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.on_transition(state, to);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn on_transition(&self, from: RunState, to: RunState) {
        {
            let mut window = self.lock_window();
            if to == RunState::Running && window.0.is_none() {
                window.0 = Some(Instant::now());
            }
            if to.is_terminal() && window.1.is_none() {
                window.1 = Some(Instant::now());
            }
        }
        info!("[{}] state: {from:?} -> {to:?}", self.name);
        self.events.publish(EngineEvent::StateChanged {
            name: self.name.clone(),
            from,
            to,
        });
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, (Option<Instant>, Option<Instant>)> {
        self.window.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// IDLE -> RUNNING. Fails if the run was stopped before it began.
    pub fn begin(&self) -> bool {
        self.transition(&[RunState::Idle], RunState::Running)
    }

    pub fn pause(&self) -> bool {
        self.transition(&[RunState::Running], RunState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(&[RunState::Paused], RunState::Running)
    }

    /// Accepted from IDLE too, so a run stopped before its task starts never begins.
    pub fn stop(&self) -> bool {
        self.transition(
            &[RunState::Idle, RunState::Running, RunState::Paused],
            RunState::Stopped,
        )
    }

    pub(crate) fn fail(&self) -> bool {
        self.transition(
            &[RunState::Idle, RunState::Running, RunState::Paused],
            RunState::Error,
        )
    }

    pub fn set_position(&self, step_index: usize, retry_count: u32) {
        self.step_index.store(step_index, Ordering::SeqCst);
        self.retry_count.store(retry_count, Ordering::SeqCst);
    }

    pub(crate) fn count_loop(&self) -> u64 {
        self.loop_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        match *self.lock_window() {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            state: self.state(),
            step_index: self.step_index.load(Ordering::SeqCst),
            retry_count: self.retry_count.load(Ordering::SeqCst),
            loop_count: self.loop_count(),
            elapsed: self.elapsed(),
        }
    }
}
