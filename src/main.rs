mod args;

use android_macro_run::adb::{AdbLocator, AdbShell, Device};
use android_macro_run::automation::{MacroEngine, QueueItem};
use android_macro_run::background::BackgroundScheduler;
use android_macro_run::config::AppConfig;
use android_macro_run::toolkit::Toolkit;
use android_macro_run::{logging, store};
use args::{Args, Mode};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    let Some(args) = Args::parse() else {
        return;
    };

    let loaded = match AppConfig::load(&args.config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };
    let found = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    if args.debug_mode {
        config.logging.level = "debug".to_string();
    }
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("⚠️ Logger already set: {e}");
    }
    if !found {
        warn!(
            "⚠️ Config file not found: {}, using defaults",
            args.config_path.display()
        );
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("❌ Failed to start runtime: {e}");
            std::process::exit(1);
        }
    };
    let code = rt.block_on(run(args, config));
    std::process::exit(code);
}

async fn run(args: Args, config: AppConfig) -> i32 {
    let adb = AdbLocator::from_config(&config.adb).resolve().await;
    let shell = Arc::new(AdbShell::new(adb, config.adb.clone()));

    if args.mode == Mode::Devices {
        return match shell.list_devices().await {
            Ok(devices) if devices.is_empty() => {
                println!("❌ No devices found");
                1
            }
            Ok(devices) => {
                for d in devices {
                    println!("📱 {}\t{}", d.serial, d.state);
                }
                0
            }
            Err(e) => {
                println!("❌ List error: {e}");
                1
            }
        };
    }

    match shell.connect().await {
        Ok(true) => {}
        Ok(false) => {
            error!("❌ No device available at {}", config.adb.target());
            return 1;
        }
        Err(e) => {
            error!("❌ Connect failed: {e}");
            return 1;
        }
    }

    let code = if args.mode == Mode::Screenshot {
        screenshot(&shell).await
    } else {
        automate(&args, &config, shell.clone()).await
    };

    if let Err(e) = shell.disconnect().await {
        warn!("⚠️ Disconnect failed: {e}");
    }
    code
}

async fn screenshot(shell: &AdbShell) -> i32 {
    let Some(png) = shell.screenshot().await else {
        println!("❌ Screenshot failed");
        return 1;
    };
    match tokio::fs::write("cli-screenshot.png", &png).await {
        Ok(()) => {
            println!("✅ Screenshot ({} bytes) saved to cli-screenshot.png", png.len());
            0
        }
        Err(e) => {
            println!("❌ Write failed: {e}");
            1
        }
    }
}

async fn automate(args: &Args, config: &AppConfig, shell: Arc<AdbShell>) -> i32 {
    let toolkit = Toolkit::new(shell, config);
    let engine = MacroEngine::new(toolkit.clone());
    let background = BackgroundScheduler::new(toolkit);

    if let Some(path) = &args.background {
        let started = store::load_action_set(path)
            .map_err(|e| e.to_string())
            .and_then(|set| background.set_action_set(set).map_err(|e| e.to_string()))
            .and_then(|()| background.start().map_err(|e| e.to_string()));
        if let Err(e) = started {
            error!("❌ Background actions not started: {e}");
            return 1;
        }
    }

    let started = match &args.mode {
        Mode::Run(path) => match store::load_script(path) {
            Ok(script) => engine.start_script(script).await.map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        },
        Mode::Queue(paths) => {
            let items = paths.iter().map(|p| QueueItem::new(p, 1)).collect();
            engine
                .start_queue(items, args.queue_repeats)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        _ => Ok(()),
    };
    if let Err(e) = started {
        error!("❌ {e}");
        background.stop().await;
        return 1;
    }

    let macro_mode = matches!(args.mode, Mode::Run(_) | Mode::Queue(_));
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("🛑 Ctrl-C received, shutting down"),
        _ = deadline(args.timeout_secs) => info!("⏰ Timeout reached, shutting down"),
        _ = engine.wait(), if macro_mode => info!("🏁 Macro finished"),
    }

    engine.stop().await;
    background.stop().await;
    0
}

async fn deadline(secs: Option<u64>) {
    match secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}
