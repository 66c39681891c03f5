use std::{path::PathBuf, time::Duration};

use clap::Parser;
use locstream_logic::PermissionLevel;
use locstream_test_shared::{Script, prelude::*, run_script};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
/// Play a script of provider events through a location service and print every stream
/// event and provider command as a JSON line
struct Cli {
    /// Path to the JSON script to replay
    script: PathBuf,

    /// Milliseconds to wait before each step
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Don't start compass updates when the service is enabled
    #[arg(long)]
    no_heading: bool,

    /// Request "always" permission instead of "while in use"
    #[arg(long)]
    always: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();

    let raw = tokio::fs::read_to_string(&cli.script)
        .await
        .with_context(|| format!("Failed to read script {}", cli.script.display()))?;
    let mut script: Script = serde_json::from_str(&raw).context("Failed to parse script")?;

    if cli.no_heading {
        script.settings.track_heading = false;
    }
    if cli.always {
        script.settings.permission = PermissionLevel::Always;
    }

    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    info!(
        "Replaying {} steps from {}",
        script.steps.len(),
        cli.script.display()
    );

    let finished = run_script(
        &script,
        Duration::from_millis(cli.interval_ms),
        &cancel,
        |output| {
            let line = serde_json::to_string(&output).context("Failed to encode output")?;
            println!("{line}");
            Ok(())
        },
    )
    .await?;

    if finished {
        info!("Replay complete");
    } else {
        warn!("Replay cancelled");
    }

    Ok(())
}
