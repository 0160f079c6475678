use anyhow::Result;
use clap::Parser;
use miccheck::{
    AlwaysGranted, BackendKind, Config, CpalDeviceFactory, DeviceFactory, RecordPlaybackEngine,
    SessionController, SyntheticConfig, SyntheticDeviceFactory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Record one take from the microphone and play it back
#[derive(Debug, Parser)]
#[command(name = "miccheck", version)]
struct Args {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/miccheck")]
    config: String,

    /// List input and output devices, then exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("miccheck v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        for name in CpalDeviceFactory::list_input_devices()? {
            println!("input:  {}", name);
        }
        for name in CpalDeviceFactory::list_output_devices()? {
            println!("output: {}", name);
        }
        return Ok(());
    }

    cfg.ensure_recordings_dir()?;
    info!("Recording slot: {}", cfg.recording_path().display());

    let factory: Arc<dyn DeviceFactory> = match cfg.audio.backend {
        BackendKind::Cpal => Arc::new(CpalDeviceFactory::new(
            cfg.audio.input_device.clone(),
            cfg.audio.output_device.clone(),
        )),
        BackendKind::Synthetic => Arc::new(SyntheticDeviceFactory::new(SyntheticConfig::default())),
    };

    let engine = RecordPlaybackEngine::new(cfg.engine_settings(), factory, Arc::new(AlwaysGranted));
    let mut controller = SessionController::new(engine);

    println!("Commands: rec (r), play (p), status (s), quit (q)");
    print_snapshot(&controller)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };

                let result = match line.trim() {
                    "rec" | "r" => controller.on_record_toggle().await.map(|_| ()),
                    "play" | "p" => controller.on_play_toggle().await.map(|_| ()),
                    "status" | "s" => Ok(()),
                    "quit" | "q" => break,
                    "" => continue,
                    other => {
                        println!("Unknown command: {}", other);
                        continue;
                    }
                };

                if let Err(e) = result {
                    println!("error: {}", e);
                }
                print_snapshot(&controller)?;
            }
            _ = ticker.tick() => {
                match controller.poll().await {
                    Ok(true) => print_snapshot(&controller)?,
                    Ok(false) => {}
                    Err(e) => {
                        println!("error: {}", e);
                        print_snapshot(&controller)?;
                    }
                }
            }
        }
    }

    if let Err(e) = controller.shutdown().await {
        warn!("Shutdown: {}", e);
    }
    info!("Bye");

    Ok(())
}

fn print_snapshot(controller: &SessionController) -> Result<()> {
    println!("{}", serde_json::to_string(&controller.snapshot())?);
    Ok(())
}
