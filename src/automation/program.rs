//! The program capability and the run wrapper that drives it.
//!
//! A [`MacroProgram`] is called once for `setup`, then once per loop
//! iteration for as long as its [`RunControl`] stays RUNNING. The wrapper owns
//! pause polling, error cooldown and the terminal transition, so programs only
//! describe what one iteration does.

use super::control::{RunControl, RunState};
use super::error::{MacroError, MacroResult};
use crate::adb::Device;
use crate::events::EngineEvent;
use crate::toolkit::Toolkit;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// What a program sees while it runs.
pub struct MacroContext<D: Device> {
    pub toolkit: Arc<Toolkit<D>>,
    pub control: Arc<RunControl>,
}

impl<D: Device> Clone for MacroContext<D> {
    fn clone(&self) -> Self {
        Self {
            toolkit: self.toolkit.clone(),
            control: self.control.clone(),
        }
    }
}

impl<D: Device> MacroContext<D> {
    pub fn new(toolkit: Arc<Toolkit<D>>, control: Arc<RunControl>) -> Self {
        Self { toolkit, control }
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Blocks while the run is PAUSED. Returns `false` once the run has ended.
    pub async fn hold(&self) -> bool {
        let slice = self.toolkit.engine.pause_poll();
        loop {
            match self.control.state() {
                RunState::Paused => sleep(slice).await,
                state => return !state.is_terminal(),
            }
        }
    }

    /// Sleeps in short slices and returns early once the run has ended.
    /// Time spent PAUSED does not count towards `duration`.
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let slice = self.toolkit.engine.pause_poll();
        let mut remaining = duration;
        loop {
            if !self.hold().await {
                return false;
            }
            if remaining.is_zero() {
                return true;
            }
            let step = slice.min(remaining);
            sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }

    /// Like [`sleep`](Self::sleep) but takes seconds; negative and non-finite
    /// values are treated as zero.
    pub async fn sleep_secs(&self, seconds: f64) -> bool {
        self.sleep(secs(seconds)).await
    }
}

pub(crate) fn secs(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

/// A strategy the engine can run.
pub trait MacroProgram<D: Device>: Send {
    fn name(&self) -> &str;

    fn setup(&mut self, _ctx: &MacroContext<D>) -> impl Future<Output = MacroResult<()>> + Send {
        async { Ok(()) }
    }

    /// One loop iteration.
    fn iterate(&mut self, ctx: &MacroContext<D>) -> impl Future<Output = MacroResult<()>> + Send;

    fn teardown(&mut self, _ctx: &MacroContext<D>) -> impl Future<Output = MacroResult<()>> + Send {
        async { Ok(()) }
    }

    fn on_error(&mut self, error: &MacroError) {
        error!("❌ [{}] {error}", self.name());
    }
}

/// Drives `program` until its control reaches STOPPED or ERROR and returns the
/// final state. Teardown always runs.
pub async fn run_program<D, P>(mut program: P, ctx: MacroContext<D>) -> RunState
where
    D: Device,
    P: MacroProgram<D>,
{
    let control = ctx.control.clone();
    let events = ctx.toolkit.events.clone();
    let name = program.name().to_string();

    if !control.begin() {
        info!("⏹️ [{name}] stopped before it started");
        return control.state();
    }
    info!("🚀 [{name}] macro started");
    events.publish(EngineEvent::RunStarted { name: name.clone() });

    match program.setup(&ctx).await {
        Ok(()) => drive(&mut program, &ctx).await,
        Err(e) => {
            error!("❌ [{name}] setup failed: {e}");
            events.publish(EngineEvent::RunError {
                name: name.clone(),
                message: e.to_string(),
            });
            control.fail();
        }
    }

    if let Err(e) = program.teardown(&ctx).await {
        debug!("[{name}] teardown error ignored: {e}");
    }
    if !control.state().is_terminal() {
        control.stop();
    }

    let state = control.state();
    let loops = control.loop_count();
    info!(
        "🏁 [{name}] macro finished: {state:?}, loops {loops}, time {:.1}s",
        control.elapsed().as_secs_f64()
    );
    events.publish(EngineEvent::RunFinished { name, state, loops });
    state
}

async fn drive<D: Device, P: MacroProgram<D>>(program: &mut P, ctx: &MacroContext<D>) {
    let control = &ctx.control;
    let engine = &ctx.toolkit.engine;
    loop {
        match control.state() {
            RunState::Running => {}
            RunState::Paused => {
                sleep(engine.pause_poll()).await;
                continue;
            }
            _ => break,
        }

        match program.iterate(ctx).await {
            Ok(()) => {
                if control.state().is_active() {
                    let n = control.count_loop();
                    if n <= 3 || n % 50 == 0 {
                        debug!("[{}] loop #{n}", program.name());
                    }
                }
            }
            Err(e) => {
                program.on_error(&e);
                ctx.toolkit.events.publish(EngineEvent::RunError {
                    name: program.name().to_string(),
                    message: e.to_string(),
                });
                if control.is_running() {
                    warn!("⚠️ [{}] continuing after error", program.name());
                    ctx.sleep(engine.error_cooldown()).await;
                }
            }
        }
    }
}
