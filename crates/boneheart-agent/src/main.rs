//! Boneheart CLI: run the pirate, or describe one photo.
//!
//! Usage:
//!   cargo run -p boneheart-agent              # interactive session (same as `run`)
//!   cargo run -p boneheart-agent -- describe  # one photo → description on stdout
//!
//! Settings come from `config/boneheart.toml` (or `BONEHEART_CONFIG`) and `BONEHEART_*`
//! environment variables; secrets from the environment or `.env`.

use boneheart_agent::{
    build_session, describe_once, init_tracing, spawn_stdin_reader, AgentConfig, AgentResult,
    LogOutput, Secrets,
};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Background tasks still running after the session ends are abandoned after this.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());
    match command.as_str() {
        "run" => run_with(LogOutput::Stdout, run),
        "describe" => run_with(LogOutput::Stderr, describe),
        "help" | "-h" | "--help" => {
            print_usage();
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!("Captain Boneheart, interactive pirate animatronic");
    eprintln!("  boneheart [run]     Start the voice session (p = pause, i = idle, r = restart, q = quit)");
    eprintln!("  boneheart describe  Take one photo and print a description of the people in it");
    eprintln!();
    eprintln!("Requires GEMINI_API_KEY (or LLM_API_KEY). ELEVENLABS_API_KEY and STT_API_KEY are optional.");
}

fn run_with<F, Fut>(output: LogOutput, body: F) -> ExitCode
where
    F: FnOnce(AgentConfig, Secrets) -> Fut,
    Fut: std::future::Future<Output = AgentResult<()>>,
{
    let secrets = Secrets::from_env();
    init_tracing(&secrets, output);

    let config = match AgentConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(body(config, secrets));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AgentConfig, secrets: Secrets) -> AgentResult<()> {
    info!(?secrets, "🏴‍☠️ Captain Boneheart waking up");
    let session = build_session(&config, &secrets, tokio::runtime::Handle::current())?;

    let result = session.run(spawn_stdin_reader()).await;
    session.cleanup().await;

    let transcript = result?;
    if !transcript.is_empty() {
        info!("Complete transcript: {}", transcript);
    }
    Ok(())
}

async fn describe(config: AgentConfig, secrets: Secrets) -> AgentResult<()> {
    let description = describe_once(&config, &secrets).await?;
    println!("{}", description);
    Ok(())
}
