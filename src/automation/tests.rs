// Tests for the macro runtime
// Focus: flow directives, run lifecycle, engine slot, pausing, queue runner

#[cfg(test)]
mod runtime_tests {
    use super::super::builtin::TemplateTapProgram;
    use super::super::control::{RunControl, RunState};
    use super::super::engine::MacroEngine;
    use super::super::error::MacroError;
    use super::super::interpreter::ScriptProgram;
    use super::super::program::{MacroContext, run_program};
    use super::super::queue::QueueItem;
    use super::super::script::{FlowDirective, Script, Step, StepKind};
    use crate::config::AppConfig;
    use crate::events::EngineEvent;
    use crate::humanizer::Humanizer;
    use crate::store;
    use crate::testing::{FakeDevice, Input, encode_png, noise_frame, paste};
    use crate::toolkit::Toolkit;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::sleep;

    fn toolkit(device: Arc<FakeDevice>) -> Arc<Toolkit<FakeDevice>> {
        let config = AppConfig::default();
        let humanizer = Humanizer::with_seed(config.humanizer.clone(), 5);
        Toolkit::with_humanizer(device, &config, humanizer)
    }

    async fn run_script(
        toolkit: &Arc<Toolkit<FakeDevice>>,
        script: Script,
    ) -> (RunState, Arc<RunControl>) {
        let control = Arc::new(RunControl::new(script.name.clone(), toolkit.events.clone()));
        let ctx = MacroContext::new(toolkit.clone(), control.clone());
        let state = run_program(ScriptProgram::new(script), ctx).await;
        (state, control)
    }

    fn drain(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn point(input: &Input) -> (u32, u32) {
        match *input {
            Input::Tap(x, y) | Input::Swipe(x, y, _, _, _) => (x, y),
            Input::Key(k) => panic!("unexpected key {k}"),
        }
    }

    fn near(input: &Input, x: u32, y: u32, radius: u32) -> bool {
        let (px, py) = point(input);
        px.abs_diff(x) <= radius && py.abs_diff(y) <= radius
    }

    fn click_image(path: &Path, threshold: f32) -> StepKind {
        StepKind::ClickImage {
            template_path: path.to_path_buf(),
            threshold,
        }
    }

    fn stop_click(x: u32, y: u32) -> Step {
        Step::new("finish", StepKind::ClickCoord { x, y }).on_success(FlowDirective::Stop)
    }

    fn save_png(dir: &Path, name: &str, width: u32, height: u32, seed: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, encode_png(&noise_frame(width, height, seed))).unwrap();
        path
    }

    // ==================== Step interpreter ====================

    #[tokio::test(start_paused = true)]
    async fn test_retry_makes_exactly_max_attempts_then_advances() {
        // No screen: every attempt asks the device for a fresh screenshot.
        let device = Arc::new(FakeDevice::new());
        let toolkit = toolkit(device.clone());
        let script = Script::new(
            "retry",
            vec![
                Step::new("missing", click_image(Path::new("missing.png"), 0.9)).retries(3, 0.0),
                stop_click(100, 100),
            ],
        );

        let (state, control) = run_script(&toolkit, script).await;

        assert_eq!(state, RunState::Stopped);
        assert_eq!(device.screenshot_count(), 3);
        assert_eq!(device.inputs().len(), 1);
        assert_eq!(control.loop_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_goto_out_of_range_behaves_as_advance() {
        let device = Arc::new(FakeDevice::new());
        let toolkit = toolkit(device.clone());
        let script = Script::new(
            "goto",
            vec![
                Step::new("hop", StepKind::Wait { wait_time: 0.0 })
                    .on_success(FlowDirective::Goto(99)),
                stop_click(10, 10),
                stop_click(500, 500),
            ],
        );

        let (state, _) = run_script(&toolkit, script).await;

        assert_eq!(state, RunState::Stopped);
        let inputs = device.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(near(&inputs[0], 10, 10, 5), "{inputs:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_goto_jumps_to_valid_target() {
        let device = Arc::new(FakeDevice::new());
        let toolkit = toolkit(device.clone());
        let script = Script::new(
            "goto",
            vec![
                Step::new("hop", StepKind::Wait { wait_time: 0.0 })
                    .on_success(FlowDirective::Goto(2)),
                stop_click(10, 10),
                stop_click(500, 500),
            ],
        );

        run_script(&toolkit, script).await;

        let inputs = device.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(near(&inputs[0], 500, 500, 5), "{inputs:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_if_image_branches_on_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let mut frame = noise_frame(90, 70, 1);
        let patch = noise_frame(18, 18, 42);
        paste(&mut frame, &patch, 30, 20);
        let marker = dir.path().join("marker.png");
        std::fs::write(&marker, encode_png(&patch)).unwrap();

        let device = Arc::new(FakeDevice::with_screen(&frame));
        let toolkit = toolkit(device.clone());
        let script = Script::new(
            "branch",
            vec![
                Step::new(
                    "visible?",
                    StepKind::IfImage {
                        template_path: marker,
                        threshold: 0.9,
                    },
                )
                .on_success(FlowDirective::Goto(2))
                .on_fail(FlowDirective::Next),
                stop_click(10, 10),
                stop_click(300, 300),
            ],
        );

        run_script(&toolkit, script).await;

        let inputs = device.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(near(&inputs[0], 300, 300, 5), "{inputs:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_image_times_out_then_fails() {
        let device = Arc::new(FakeDevice::with_screen(&noise_frame(60, 60, 3)));
        let toolkit = toolkit(device.clone());
        let script = Script::new(
            "patience",
            vec![
                Step::new(
                    "appear",
                    StepKind::WaitForImage {
                        template_path: PathBuf::from("never.png"),
                        threshold: 0.9,
                        timeout: 2.0,
                    },
                )
                .on_fail(FlowDirective::Goto(2)),
                stop_click(10, 10),
                stop_click(40, 40),
            ],
        );

        let started = tokio::time::Instant::now();
        run_script(&toolkit, script).await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        let inputs = device.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(near(&inputs[0], 40, 40, 5), "{inputs:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_failed_image_then_click_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let a = save_png(dir.path(), "a.png", 16, 16, 2);
        let device = Arc::new(FakeDevice::with_screen(&noise_frame(80, 60, 1)));
        let toolkit = toolkit(device.clone());
        let mut rx = toolkit.events.subscribe();
        let script = Script::new(
            "e2e",
            vec![
                Step::new("A", click_image(&a, 0.9))
                    .on_fail(FlowDirective::Retry)
                    .retries(2, 0.0),
                stop_click(100, 100),
            ],
        );

        let (state, control) = run_script(&toolkit, script).await;

        assert_eq!(state, RunState::Stopped);
        assert_eq!(control.loop_count(), 2);
        let inputs = device.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(near(&inputs[0], 100, 100, 5), "{inputs:?}");

        let events = drain(&mut rx);
        assert!(events.contains(&EngineEvent::StepChanged {
            index: 1,
            name: "finish".to_string()
        }));
        assert!(matches!(events.last(), Some(EngineEvent::RunFinished {
            state: RunState::Stopped,
            loops: 2,
            ..
        })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_script_ends_in_error() {
        let toolkit = toolkit(Arc::new(FakeDevice::new()));
        let mut rx = toolkit.events.subscribe();

        let (state, _) = run_script(&toolkit, Script::new("empty", vec![])).await;

        assert_eq!(state, RunState::Error);
        assert!(drain(&mut rx).iter().any(|e| matches!(e, EngineEvent::RunError { .. })));
    }

    // ==================== Engine ====================

    fn idle_script(name: &str) -> Script {
        Script::new(name, vec![Step::new("idle", StepKind::Wait { wait_time: 1.0 })])
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_leaves_exactly_one_active_run() {
        let engine = MacroEngine::new(toolkit(Arc::new(FakeDevice::new())));

        let first = engine.start_script(idle_script("first")).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(first.state(), RunState::Running);

        let second = engine.start_script(idle_script("second")).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        assert_eq!(first.state(), RunState::Stopped);
        assert_eq!(second.state(), RunState::Running);
        assert_eq!(engine.state(), RunState::Running);
        assert_eq!(engine.current_name().as_deref(), Some("second"));

        engine.stop().await;
        assert_eq!(second.state(), RunState::Stopped);
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_through_engine() {
        let engine = MacroEngine::new(toolkit(Arc::new(FakeDevice::new())));
        let control = engine.start_script(idle_script("loop")).await.unwrap();
        sleep(Duration::from_millis(2500)).await;

        assert!(engine.pause());
        let loops = control.loop_count();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(engine.state(), RunState::Paused);
        assert!(control.loop_count() <= loops + 1);

        assert!(engine.resume());
        sleep(Duration::from_secs(3)).await;
        assert!(control.loop_count() > loops + 1);
        assert_eq!(engine.snapshot().unwrap().state, RunState::Running);

        engine.stop().await;
        assert_eq!(engine.state(), RunState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_starts_leave_exactly_one_active_run() {
        let engine = MacroEngine::new(toolkit(Arc::new(FakeDevice::new())));
        let first = engine.start_script(idle_script("first")).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        let (a, b) = tokio::join!(
            engine.start_script(idle_script("a")),
            engine.start_script(idle_script("b")),
        );
        let runs = [first, a.unwrap(), b.unwrap()];
        sleep(Duration::from_millis(300)).await;

        let active: Vec<&str> = runs
            .iter()
            .filter(|c| c.state().is_active())
            .map(|c| c.name())
            .collect();
        assert_eq!(active.len(), 1, "{active:?}");
        assert_eq!(engine.current_name().as_deref(), Some(active[0]));

        engine.stop().await;
        assert!(runs.iter().all(|c| c.state().is_terminal()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_racing_a_start_leaves_nothing_running() {
        let engine = MacroEngine::new(toolkit(Arc::new(FakeDevice::new())));
        engine.start_script(idle_script("old")).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        let (started, ()) = tokio::join!(engine.start_script(idle_script("new")), engine.stop());
        let started = started.unwrap();
        sleep(Duration::from_millis(300)).await;

        assert!(started.state().is_terminal());
        assert!(!engine.is_running());
    }

    // ==================== Pause at suspension points ====================

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_wait_for_image_without_failing_it() {
        let device = Arc::new(FakeDevice::with_screen(&noise_frame(60, 60, 3)));
        let engine = MacroEngine::new(toolkit(device.clone()));
        let script = Script::new(
            "watch",
            vec![
                Step::new(
                    "appear",
                    StepKind::WaitForImage {
                        template_path: PathBuf::from("never.png"),
                        threshold: 0.9,
                        timeout: 3.0,
                    },
                )
                .on_fail(FlowDirective::Stop),
            ],
        );
        let control = engine.start_script(script).await.unwrap();
        sleep(Duration::from_millis(700)).await;

        assert!(engine.pause());
        let shots = device.screenshot_count();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(control.state(), RunState::Paused);
        assert_eq!(device.screenshot_count(), shots, "no polling while paused");

        assert!(engine.resume());
        sleep(Duration::from_secs(1)).await;
        assert_eq!(control.state(), RunState::Running, "timeout excludes paused time");

        sleep(Duration::from_secs(2)).await;
        assert_eq!(control.state(), RunState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_retry_delay() {
        let device = Arc::new(FakeDevice::new());
        let engine = MacroEngine::new(toolkit(device.clone()));
        let script = Script::new(
            "slow retry",
            vec![
                Step::new("missing", click_image(Path::new("missing.png"), 0.9)).retries(2, 2.0),
                stop_click(100, 100),
            ],
        );
        engine.start_script(script).await.unwrap();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(device.screenshot_count(), 1);

        assert!(engine.pause());
        sleep(Duration::from_secs(10)).await;
        assert_eq!(device.screenshot_count(), 1);
        assert!(device.inputs().is_empty());

        assert!(engine.resume());
        sleep(Duration::from_millis(500)).await;
        assert!(device.inputs().is_empty(), "about a second of delay was left");

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(device.screenshot_count(), 2);
        assert_eq!(device.inputs().len(), 1);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_ends_in_error() {
        let engine = MacroEngine::new(toolkit(Arc::new(FakeDevice::new())));
        let control = engine
            .start(TemplateTapProgram::new("nothing", vec![], 0.9))
            .await
            .unwrap();
        engine.wait().await;
        assert_eq!(control.state(), RunState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_refuses_empty_script_and_disconnected_device() {
        let device = Arc::new(FakeDevice::new());
        let engine = MacroEngine::new(toolkit(device.clone()));

        let empty = engine.start_script(Script::new("empty", vec![])).await;
        assert!(matches!(empty, Err(MacroError::EmptyScript(_))));

        device.set_connected(false);
        let refused = engine.start_script(idle_script("x")).await;
        assert!(matches!(refused, Err(MacroError::NotConnected)));
        assert_eq!(engine.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_template_tap_program_taps_best_match() {
        let dir = tempfile::tempdir().unwrap();
        let mut frame = noise_frame(120, 90, 1);
        let button = noise_frame(24, 24, 77);
        paste(&mut frame, &button, 50, 30);
        std::fs::write(dir.path().join("button.png"), encode_png(&button)).unwrap();
        save_png(dir.path(), "absent.png", 20, 20, 123);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let device = Arc::new(FakeDevice::with_screen(&frame));
        let engine = MacroEngine::new(toolkit(device.clone()));
        let program = TemplateTapProgram::from_dir(dir.path(), 0.9).unwrap();
        assert_eq!(program.templates().len(), 2);

        engine.start(program).await.unwrap();
        sleep(Duration::from_secs(3)).await;
        engine.stop().await;

        let inputs = device.inputs();
        assert!(!inputs.is_empty());
        assert!(inputs.iter().all(|i| near(i, 62, 42, 8)), "{inputs:?}");
    }

    // ==================== Queue ====================

    fn write_script(dir: &Path, name: &str, script: &Script) -> PathBuf {
        let path = dir.join(name);
        store::save_script(script, &path).unwrap();
        path
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_runs_items_and_skips_unusable_ones() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_script(dir.path(), "a.yaml", &Script::new("a", vec![stop_click(10, 10)]));
        let b = write_script(dir.path(), "b.yaml", &Script::new("b", vec![stop_click(200, 200)]));
        let empty = write_script(dir.path(), "empty.yaml", &Script::new("empty", vec![]));
        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "steps: [").unwrap();

        let device = Arc::new(FakeDevice::new());
        let engine = MacroEngine::new(toolkit(device.clone()));
        let mut rx = engine.toolkit().events.subscribe();

        let queue = engine
            .start_queue(
                vec![
                    QueueItem::new(a, 2),
                    QueueItem::new(broken, 1),
                    QueueItem::new(empty, 1),
                    QueueItem::new(dir.path().join("missing.yaml"), 1),
                    QueueItem::new(b, 1),
                ],
                2,
            )
            .await
            .unwrap();
        engine.wait().await;

        assert!(queue.is_finished());
        assert_eq!(queue.state(), RunState::Stopped);
        assert_eq!(device.inputs().len(), 6);

        let events = drain(&mut rx);
        let progress: Vec<(usize, u32, u32)> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::QueueProgress {
                    index,
                    repetition,
                    repetitions,
                    ..
                } => Some((*index, *repetition, *repetitions)),
                _ => None,
            })
            .collect();
        assert_eq!(
            progress,
            vec![(0, 1, 2), (0, 2, 2), (4, 1, 1), (0, 1, 2), (0, 2, 2), (4, 1, 1)]
        );
        assert_eq!(events.last(), Some(&EngineEvent::QueueFinished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_stop_reaches_active_sub_run() {
        let dir = tempfile::tempdir().unwrap();
        let endless = write_script(dir.path(), "endless.yaml", &idle_script("endless"));

        let engine = MacroEngine::new(toolkit(Arc::new(FakeDevice::new())));
        let queue = engine
            .start_queue(vec![QueueItem::new(endless, 3)], 1)
            .await
            .unwrap();
        sleep(Duration::from_secs(3)).await;

        let sub_run = queue.current().unwrap();
        assert_eq!(sub_run.state(), RunState::Running);
        assert!(engine.pause());
        assert_eq!(sub_run.state(), RunState::Paused);
        assert!(engine.resume());

        engine.stop().await;

        assert_eq!(sub_run.state(), RunState::Stopped);
        assert!(queue.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_pause_between_sub_runs_holds_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let once = write_script(dir.path(), "once.yaml", &Script::new("once", vec![stop_click(10, 10)]));

        let device = Arc::new(FakeDevice::new());
        let engine = MacroEngine::new(toolkit(device.clone()));
        let queue = engine
            .start_queue(vec![QueueItem::new(once, 2)], 1)
            .await
            .unwrap();

        // Wait for the first sub-run to end; the queue is then in its gap.
        for _ in 0..2000 {
            if queue.current().is_some_and(|c| c.state().is_terminal()) {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(device.inputs().len(), 1);

        assert!(engine.pause());
        assert!(queue.is_paused());
        assert_eq!(engine.state(), RunState::Paused);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(device.inputs().len(), 1, "next sub-run held back");

        assert!(engine.resume());
        engine.wait().await;
        assert_eq!(device.inputs().len(), 2);
        assert!(queue.is_finished());
    }
}
