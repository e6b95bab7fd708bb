//! Demo host for llama-bridge.
//!
//! Prepares a session against the stub engine, streams the completion to
//! stdout fragment by fragment, and releases the session. Serves as the
//! reference for how a host drives the bridge surface.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::info;

use llama_bridge::budget;
use llama_bridge::config::Cli;
use llama_bridge::engine::llama::LlamaEngine;
use llama_bridge::engine::FlashAttention;
use llama_bridge::{ListenerError, RuntimeOptions, SamplingOptions, SessionManager, SessionRegistry, TokenListener};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "llama_bridge=debug"
    } else {
        "llama_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("llama-bridge v{}", env!("CARGO_PKG_VERSION"));

    // Assemble runtime options: JSON file if given, CLI flags otherwise.
    let mut options = match &cli.runtime_config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            RuntimeOptions::from_json(&raw, cli.threads, cli.context_size)
        }
        None => RuntimeOptions::new(cli.threads, cli.context_size),
    };
    if let Some(raw) = cli.flash_attention {
        let mode = FlashAttention::from_raw(raw).ok_or_else(|| {
            anyhow::anyhow!("invalid flash attention mode {raw} (use -1, 0, or 1)")
        })?;
        options.flash_attention = Some(mode);
    }

    // Derive the generation allowance when the caller did not pick one.
    let max_tokens = cli.max_tokens.unwrap_or_else(|| {
        budget::compute_token_budget(
            &cli.prompt,
            options.context_size,
            budget::derive_default_max_tokens(options.context_size),
        )
        .max_tokens
    });

    let mut sampling = SamplingOptions::new(max_tokens);
    sampling.temperature = cli.temperature;
    sampling.top_p = cli.top_p;
    sampling.top_k = cli.top_k;
    sampling.repeat_penalty = cli.repeat_penalty;
    sampling.seed = cli.seed;
    sampling.stop_sequences = cli.stop_sequences.clone();

    info!(
        model = %cli.model.display(),
        threads = options.thread_count,
        ctx = options.context_size,
        max_tokens,
        "starting completion"
    );

    let registry = Arc::new(SessionRegistry::new(Arc::new(LlamaEngine)));
    let manager = SessionManager::new(registry);
    manager.prepare(&cli.model, &options)?;

    let start = Instant::now();
    let mut fragments = 0usize;
    let mut on_token = |fragment: &str| -> Result<(), ListenerError> {
        print!("{fragment}");
        std::io::stdout()
            .flush()
            .map_err(|err| ListenerError::new(err.to_string()))?;
        fragments += 1;
        Ok(())
    };

    let completion = manager.run(
        &cli.prompt,
        &sampling,
        Some(&mut on_token as &mut dyn TokenListener),
    )?;
    println!();

    info!(
        fragments,
        chars = completion.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "completion finished"
    );

    manager.release();
    Ok(())
}
