//! rtc-bridge demo
//!
//! Wires the call and capture controllers to simulated platform services
//! and runs one call (plus optional screen capture) until Ctrl+C or the
//! requested duration elapses.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rtc_bridge::call::{CallAction, CallHooks, CallSessionController};
use rtc_bridge::capture::{CaptureHooks, CaptureSessionController};
use rtc_bridge::config::Config;
use rtc_bridge::logging;
use rtc_bridge::sim::{AutoConfirmAuthority, SimulatedCapturer};

const DEMO_APP_GROUP: &str = "group.dev.rtc-bridge.demo";

/// Command line options
#[derive(Debug, Default)]
struct Options {
    display_name: Option<String>,
    audio_only: bool,
    capture: bool,
    duration: Option<Duration>,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let options = parse_args(&args)?;

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = match logging::init_logging() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();
            warn!("File logging unavailable, using stderr only: {:#}", e);
            None
        }
    };

    info!("rtc-bridge starting...");

    let config = Config::load()?;
    info!("Configuration loaded from {:?}", config.config_path()?);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(run(config, options))?;

    info!("Shutdown complete");
    Ok(())
}

async fn run(mut config: Config, options: Options) -> Result<()> {
    let confirm_delay = Duration::from_millis(config.demo.confirm_delay_ms);
    let authority = Arc::new(AutoConfirmAuthority::new(confirm_delay));

    let hooks = CallHooks::new()
        .on_call_started(|| info!("Media session: create peer connection"))
        .on_call_ended(|| info!("Media session: close peer connection"))
        .on_call_failed(|reason| warn!("Media session: call failed: {}", reason))
        .on_call_muted(|muted| info!("Media session: microphone muted = {}", muted))
        .on_call_held(|held| info!("Media session: call on hold = {}", held));
    let calls = CallSessionController::new(authority.clone(), hooks, &config.call);
    let mut actions = calls.subscribe();

    let capture = if options.capture {
        if config.capture.app_group_id.is_none() {
            warn!(
                "No application group configured, using {} for the demo",
                DEMO_APP_GROUP
            );
            config.capture.app_group_id = Some(DEMO_APP_GROUP.to_string());
        }
        let hooks = CaptureHooks::new()
            .on_capture_ready(|| info!("Media session: screen track live"))
            .on_capture_ended(|| warn!("Media session: screen track ended"));
        let producer = SimulatedCapturer::new(confirm_delay);
        Some(CaptureSessionController::new(producer, hooks, &config.capture))
    } else {
        None
    };

    // Ctrl+C arrives on the handler's own thread
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    let display_name = options
        .display_name
        .clone()
        .unwrap_or_else(|| config.demo.display_name.clone());
    let is_video = config.demo.is_video && !options.audio_only;
    calls.start_call(display_name, is_video);

    if let Some(capture) = &capture {
        capture.start_capture();
    }

    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = &mut deadline => {
                info!("Demo duration elapsed");
                break;
            }
            received = actions.recv() => {
                match &received {
                    Ok(action) => info!("Call action: {}", action.to_payload()),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Call action stream lagged, skipped {} actions", skipped);
                    }
                    Err(RecvError::Closed) => error!("Lost call action stream"),
                }
                if call_is_over(&received) {
                    info!("Call is over");
                    break;
                }
            }
        }
    }

    if let Some(capture) = capture {
        capture.shutdown().await;
    }

    if calls.has_active_call() {
        calls.end_call();
        wait_for_end(&calls, &mut actions, config.call.end_timeout()).await;
    }
    calls.shutdown().await;

    Ok(())
}

/// Wait for the ended notification, bounded by the configured end timeout
async fn wait_for_end(
    calls: &CallSessionController,
    actions: &mut tokio::sync::broadcast::Receiver<CallAction>,
    end_timeout: Option<Duration>,
) {
    // The controller enforces its own end timeout; allow a little slack past it
    let limit = end_timeout.unwrap_or(Duration::from_secs(5)) + Duration::from_secs(1);
    let wait = async {
        while calls.has_active_call() {
            if call_is_over(&actions.recv().await) {
                break;
            }
        }
    };

    if tokio::time::timeout(limit, wait).await.is_err() {
        warn!("Call did not end within {:?}", limit);
    }
}

/// A terminal action or a closed stream ends the wait; a lagged receiver keeps going
fn call_is_over(received: &Result<CallAction, RecvError>) -> bool {
    matches!(
        received,
        Ok(CallAction::Ended) | Ok(CallAction::Failed(_)) | Err(RecvError::Closed)
    )
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-n" | "--name" => {
                let name = iter.next().context("--name requires a value")?;
                options.display_name = Some(name.clone());
            }
            "-a" | "--audio" => options.audio_only = true,
            "-c" | "--capture" => options.capture = true,
            "-d" | "--duration" => {
                let secs = iter.next().context("--duration requires a value")?;
                let secs: u64 = secs
                    .parse()
                    .with_context(|| format!("Invalid duration: {}", secs))?;
                options.duration = Some(Duration::from_secs(secs));
            }
            other => bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(options)
}

fn print_help() {
    println!("rtc-bridge - call and screen-capture lifecycle demo");
    println!();
    println!("USAGE:");
    println!("    rtc-bridge [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help             Print this help message");
    println!("    -n, --name <NAME>      Display name shown in the call UI");
    println!("    -a, --audio            Start an audio-only call");
    println!("    -c, --capture          Also start screen capture");
    println!("    -d, --duration <SECS>  End the call after SECS seconds");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG              Set log level (e.g., debug, info, warn)");
    println!("    RTC_BRIDGE_LOG_PATH   Override the log directory");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let options = parse_args(&args(&["--name", "Alice", "-c", "-d", "30"])).unwrap();
        assert_eq!(options.display_name.as_deref(), Some("Alice"));
        assert!(options.capture);
        assert!(!options.audio_only);
        assert_eq!(options.duration, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_lagged_stream_does_not_end_call() {
        assert!(!call_is_over(&Err(RecvError::Lagged(3))));
        assert!(!call_is_over(&Ok(CallAction::Muted(true))));
        assert!(call_is_over(&Ok(CallAction::Ended)));
        assert!(call_is_over(&Ok(CallAction::Failed("busy".to_string()))));
        assert!(call_is_over(&Err(RecvError::Closed)));
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(&args(&["--duration", "soon"])).is_err());
        assert!(parse_args(&args(&["--name"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
