//! Background scheduler: fires the enabled actions of the active set on their
//! own intervals, on a worker task independent of the macro run.

use super::action::{ActionKind, BackgroundAction, BackgroundActionSet};
use crate::adb::Device;
use crate::automation::{MacroError, MacroResult};
use crate::events::EngineEvent;
use crate::toolkit::Toolkit;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

/// Per-entry fire times of one action-set generation.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    last_fired: Vec<Instant>,
}

impl ScheduleState {
    /// Every entry starts a fresh interval at `now`.
    pub fn new(len: usize, now: Instant) -> Self {
        Self {
            last_fired: vec![now; len],
        }
    }

    /// Effective interval is `interval + jitter`, clamped at zero.
    pub fn is_due(&self, index: usize, action: &BackgroundAction, now: Instant, jitter: f64) -> bool {
        let Some(last) = self.last_fired.get(index) else {
            return false;
        };
        let wait = (action.interval + jitter).max(0.0);
        now >= *last + Duration::from_secs_f64(wait)
    }

    pub fn record(&mut self, index: usize, at: Instant) {
        if let Some(slot) = self.last_fired.get_mut(index) {
            *slot = at;
        }
    }
}

fn draw_jitter(rng: &mut StdRng, spread: f64) -> f64 {
    if spread > 0.0 {
        rng.gen_range(-spread..=spread)
    } else {
        0.0
    }
}

struct ActiveSet {
    generation: u64,
    set: Arc<BackgroundActionSet>,
}

struct Shared {
    active: Mutex<ActiveSet>,
    running: AtomicBool,
    paused: AtomicBool,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, ActiveSet> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn snapshot(&self) -> (u64, Arc<BackgroundActionSet>) {
        let active = self.lock();
        (active.generation, active.set.clone())
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct BackgroundScheduler<D: Device> {
    toolkit: Arc<Toolkit<D>>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Device> BackgroundScheduler<D> {
    pub fn new(toolkit: Arc<Toolkit<D>>) -> Self {
        Self {
            toolkit,
            shared: Arc::new(Shared {
                active: Mutex::new(ActiveSet {
                    generation: 0,
                    set: Arc::new(BackgroundActionSet::default()),
                }),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn toolkit(&self) -> &Arc<Toolkit<D>> {
        &self.toolkit
    }

    pub fn action_set(&self) -> Arc<BackgroundActionSet> {
        self.shared.lock().set.clone()
    }

    /// Replaces the active set. While running, every entry waits a fresh
    /// interval from now.
    pub fn set_action_set(&self, set: BackgroundActionSet) -> MacroResult<()> {
        set.validate().map_err(MacroError::InvalidAction)?;
        let mut active = self.shared.lock();
        active.generation += 1;
        active.set = Arc::new(set);
        debug!("Background action set replaced (generation {})", active.generation);
        Ok(())
    }

    /// Keeps the set's name, swaps its actions.
    pub fn replace_actions(&self, actions: Vec<BackgroundAction>) -> MacroResult<()> {
        let name = self.action_set().name.clone();
        self.set_action_set(BackgroundActionSet::new(name, actions))
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn start(&self) -> MacroResult<()> {
        if self.is_running() {
            warn!("⚠️ Background scheduler already running");
            return Err(MacroError::AlreadyRunning);
        }
        if !self.toolkit.device.is_connected() {
            return Err(MacroError::NotConnected);
        }
        let set = self.action_set();
        set.validate().map_err(MacroError::InvalidAction)?;
        let enabled = set.enabled_count();
        if enabled == 0 {
            return Err(MacroError::InvalidAction(
                "no enabled background actions".to_string(),
            ));
        }

        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(worker(self.toolkit.clone(), self.shared.clone()));
        if let Some(stale) = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(handle)
        {
            stale.abort();
        }
        info!("🔁 Background scheduler started ({enabled} active actions)");
        self.toolkit
            .events
            .publish(EngineEvent::BackgroundStarted { enabled });
        Ok(())
    }

    /// Stops the worker and joins it, aborting after the join timeout.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(mut handle) = handle {
            let limit = self.toolkit.engine.join_timeout();
            if timeout(limit, &mut handle).await.is_err() {
                warn!("⚠️ Background worker did not stop within {limit:?}, aborting");
                handle.abort();
            }
        }
        info!("🔁 Background scheduler stopped");
        self.toolkit.events.publish(EngineEvent::BackgroundStopped);
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        info!("⏸️ Background scheduler paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        info!("▶️ Background scheduler resumed");
    }

    pub fn toggle_pause(&self) {
        if self.is_paused() {
            self.resume();
        } else {
            self.pause();
        }
    }
}

async fn worker<D: Device>(toolkit: Arc<Toolkit<D>>, shared: Arc<Shared>) {
    let tick = toolkit.engine.background_tick();
    let mut rng = StdRng::from_entropy();
    let (mut generation, mut set) = shared.snapshot();
    let mut schedule = ScheduleState::new(set.actions.len(), Instant::now());
    debug!("Background worker loop started");

    while shared.is_running() {
        if shared.paused.load(Ordering::SeqCst) {
            sleep(tick).await;
            continue;
        }
        if shared.generation() != generation {
            (generation, set) = shared.snapshot();
            schedule = ScheduleState::new(set.actions.len(), Instant::now());
        }

        let now = Instant::now();
        for (index, action) in set.actions.iter().enumerate() {
            if !shared.is_running() {
                break;
            }
            if !action.enabled {
                continue;
            }
            let jitter = draw_jitter(&mut rng, action.interval_jitter);
            if !schedule.is_due(index, action, now, jitter) {
                continue;
            }
            match execute(&toolkit, action).await {
                Ok(true) => toolkit.events.publish(EngineEvent::BackgroundFired {
                    index,
                    name: action.name.clone(),
                }),
                Ok(false) => debug!("[BG] '{}' had nothing to act on", action.name),
                Err(e) => warn!("⚠️ Background action '{}' failed: {e}", action.name),
            }
            schedule.record(index, Instant::now());
        }
        sleep(tick).await;
    }
    debug!("Background worker loop ended");
}

/// Performs one due action. `Ok(false)` means no input was sent because the
/// template was not on screen or none is configured.
async fn execute<D: Device>(toolkit: &Toolkit<D>, action: &BackgroundAction) -> MacroResult<bool> {
    match action.kind {
        ActionKind::KeyPress => {
            press_key(toolkit, action).await?;
            Ok(true)
        }
        ActionKind::TapCoord => {
            if !toolkit.input.click(action.x, action.y, true).await? {
                return Err(rejected(action, "tap"));
            }
            debug!("[BG] tap ({}, {})", action.x, action.y);
            Ok(true)
        }
        ActionKind::ImageKey => {
            let Some(path) = action.template() else {
                return Ok(false);
            };
            let Some(m) = toolkit.find(path, action.threshold).await else {
                return Ok(false);
            };
            debug!("[BG] {} seen ({:.3}), key", path.display(), m.confidence);
            press_key(toolkit, action).await?;
            Ok(true)
        }
        ActionKind::ImageTap => {
            let Some(path) = action.template() else {
                return Ok(false);
            };
            let Some(m) = toolkit.find(path, action.threshold).await else {
                return Ok(false);
            };
            if !toolkit.input.click_match(&m, true).await? {
                return Err(rejected(action, "tap"));
            }
            debug!("[BG] {} tapped ({:.3})", path.display(), m.confidence);
            Ok(true)
        }
    }
}

async fn press_key<D: Device>(toolkit: &Toolkit<D>, action: &BackgroundAction) -> MacroResult<()> {
    let output = toolkit.input.key_event(action.keycode).await?;
    if !output.is_success() {
        return Err(rejected(action, &output.stderr));
    }
    debug!("[BG] key {} ({})", action.keycode_label, action.keycode);
    Ok(())
}

fn rejected(action: &BackgroundAction, reason: &str) -> MacroError {
    MacroError::Step {
        step: action.name.clone(),
        reason: format!("rejected: {reason}"),
    }
}
