// Step-script program: executes one step per iteration and follows its flow directive
use super::error::{MacroError, MacroResult};
use super::program::{MacroContext, MacroProgram, secs};
use super::script::{FlowDirective, Script, Step, StepKind};
use crate::adb::Device;
use crate::events::EngineEvent;
use log::{info, warn};
use std::path::Path;
use std::time::Duration;

pub struct ScriptProgram {
    script: Script,
    step_index: usize,
    retry_count: u32,
}

impl ScriptProgram {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            step_index: 0,
            retry_count: 0,
        }
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn position(&self) -> (usize, u32) {
        (self.step_index, self.retry_count)
    }

    async fn execute<D: Device>(&self, step: &Step, ctx: &MacroContext<D>) -> MacroResult<bool> {
        let toolkit = &ctx.toolkit;
        match &step.kind {
            StepKind::ClickImage {
                template_path,
                threshold,
            } => match toolkit.find(template_path, *threshold).await {
                Some(m) => {
                    toolkit.input.click_match_and_wait(&m, true).await?;
                    Ok(true)
                }
                None => Ok(false),
            },
            StepKind::ClickCoord { x, y } => {
                toolkit.input.click_and_wait(*x, *y, true).await?;
                Ok(true)
            }
            StepKind::Wait { wait_time } => {
                ctx.sleep_secs(*wait_time).await;
                Ok(true)
            }
            StepKind::WaitForImage {
                template_path,
                threshold,
                timeout,
            } => Ok(self
                .wait_for(ctx, template_path, *threshold, secs(*timeout))
                .await),
            StepKind::IfImage {
                template_path,
                threshold,
            } => Ok(toolkit.find(template_path, *threshold).await.is_some()),
            StepKind::Swipe {
                x,
                y,
                x2,
                y2,
                duration_ms,
            } => {
                let output = toolkit
                    .input
                    .swipe(*x, *y, *x2, *y2, *duration_ms, true)
                    .await?;
                if !output.is_success() {
                    warn!("⚠️ Swipe rejected: {}", output.stderr);
                }
                toolkit.humanizer.wait().await;
                Ok(true)
            }
        }
    }

    /// Polls until the template shows up, the timeout passes or the run ends.
    /// The timeout only counts time the run spends RUNNING.
    async fn wait_for<D: Device>(
        &self,
        ctx: &MacroContext<D>,
        path: &Path,
        threshold: f32,
        timeout: Duration,
    ) -> bool {
        let poll = ctx.toolkit.engine.wait_for_poll();
        let mut waited = Duration::ZERO;
        while waited < timeout {
            if !ctx.hold().await {
                return false;
            }
            if ctx.toolkit.find(path, threshold).await.is_some() {
                return true;
            }
            let step = poll.min(timeout - waited);
            if !ctx.sleep(step).await {
                return false;
            }
            waited += step;
        }
        warn!("⏱️ wait_for timed out: {} ({timeout:?})", path.display());
        false
    }

    async fn apply<D: Device>(
        &mut self,
        step: &Step,
        success: bool,
        ctx: &MacroContext<D>,
    ) {
        let directive = if success {
            self.retry_count = 0;
            step.on_success
        } else {
            step.on_fail
        };

        match directive {
            FlowDirective::Next => self.advance(),
            FlowDirective::Stop => {
                info!("⏹️ Stop requested by step '{}'", step.name);
                ctx.control.stop();
            }
            FlowDirective::Retry => {
                self.retry_count += 1;
                if self.retry_count >= step.max_retries {
                    warn!(
                        "⚠️ Retry limit reached ({}), moving on from '{}'",
                        step.max_retries, step.name
                    );
                    self.advance();
                } else {
                    if matches!(self.retry_count, 1 | 5 | 10) || self.retry_count % 50 == 0 {
                        info!("🔁 Retry {}/{}", self.retry_count, step.max_retries);
                    }
                    ctx.sleep_secs(step.retry_delay).await;
                }
            }
            FlowDirective::Loop => {
                info!("🔄 Loop back to the first step");
                self.jump(0);
            }
            FlowDirective::Goto(target) if target < self.script.steps.len() => {
                info!("↪️ Jump to step {}", target + 1);
                self.jump(target);
            }
            FlowDirective::Goto(target) => {
                warn!("⚠️ goto:{target} is out of range, advancing");
                self.advance();
            }
        }
    }

    /// Past the last step the script starts over.
    fn advance(&mut self) {
        self.retry_count = 0;
        self.step_index += 1;
        if self.step_index >= self.script.steps.len() {
            self.step_index = 0;
            info!("🔄 End of script, starting over");
        }
    }

    fn jump(&mut self, index: usize) {
        self.step_index = index;
        self.retry_count = 0;
    }
}

impl<D: Device> MacroProgram<D> for ScriptProgram {
    fn name(&self) -> &str {
        &self.script.name
    }

    async fn setup(&mut self, _ctx: &MacroContext<D>) -> MacroResult<()> {
        self.step_index = 0;
        self.retry_count = 0;
        if self.script.steps.is_empty() {
            return Err(MacroError::EmptyScript(self.script.name.clone()));
        }
        info!(
            "📜 Script '{}' ({} steps)",
            self.script.name,
            self.script.steps.len()
        );
        Ok(())
    }

    async fn iterate(&mut self, ctx: &MacroContext<D>) -> MacroResult<()> {
        let index = self.step_index;
        let Some(step) = self.script.steps.get(index).cloned() else {
            self.jump(0);
            return Ok(());
        };
        ctx.control.set_position(index, self.retry_count);
        if self.retry_count == 0 {
            info!("[{}/{}] {}", index + 1, self.script.steps.len(), step.name);
            ctx.toolkit.events.publish(EngineEvent::StepChanged {
                index,
                name: step.name.clone(),
            });
        }

        let success = self.execute(&step, ctx).await?;
        self.apply(&step, success, ctx).await;
        ctx.control.set_position(self.step_index, self.retry_count);
        Ok(())
    }

    async fn teardown(&mut self, _ctx: &MacroContext<D>) -> MacroResult<()> {
        info!("📜 Script '{}' finished", self.script.name);
        Ok(())
    }
}
