use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use webcell::engine::script::{run_stdio_worker, ScriptLimits};
use webcell::engine::software::SoftwareEngine;
use webcell::{Context, SessionConfig};

#[derive(Parser)]
#[command(name = "webcell", version, about = "Headless two-surface web compositor")]
struct Cli {
    /// Serve a script context over stdin/stdout (started by the engine)
    #[arg(long, hide = true)]
    script_worker: bool,

    #[arg(long, default_value_t = 1000000, hide = true)]
    loop_limit: u64,

    #[arg(long, default_value_t = 1024, hide = true)]
    recursion_limit: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Load a page into a session and print the digest of the composite frame
    Render {
        #[arg(long)]
        url: String,

        /// Engine ticks to run after the navigation
        #[arg(long, default_value_t = 60)]
        ticks: u32,

        /// JSON session config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the raw RGBA composite here
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn render(url: &str, ticks: u32, config: Option<PathBuf>, out: Option<PathBuf>) -> Result<()> {
    let config = match config {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            SessionConfig::from_json(&json)?
        }
        None => SessionConfig::default(),
    };
    let ctx = Context::new(config, Arc::new(SoftwareEngine::new()))?;
    let handle = ctx.create_session()?;

    let mut attached = false;
    for _ in 0..ticks.max(1) {
        if ctx.is_ready(handle)? {
            attached = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(16));
    }
    anyhow::ensure!(attached, "content view did not attach");

    ctx.set_url(handle, url)?;
    for _ in 0..ticks {
        ctx.tick();
        std::thread::sleep(Duration::from_millis(16));
    }

    let frame = ctx.snapshot_rgba(handle)?;
    let (w, h) = (ctx.viewport_width(handle)?, ctx.viewport_height(handle)?);
    println!("{}x{} sha256:{}", w, h, hex::encode(Sha256::digest(&frame)));
    if let Some(path) = out {
        std::fs::write(&path, &frame).with_context(|| format!("writing {}", path.display()))?;
        log::info!("wrote {} bytes to {}", frame.len(), path.display());
    }
    ctx.free_session(handle)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.script_worker {
        let limits = ScriptLimits {
            loop_iteration_limit: cli.loop_limit,
            recursion_limit: cli.recursion_limit,
        };
        run_stdio_worker(limits, std::io::stdin().lock(), std::io::stdout().lock())?;
        return Ok(());
    }

    match cli.command {
        Some(Command::Render {
            url,
            ticks,
            config,
            out,
        }) => render(&url, ticks, config, out),
        None => {
            println!("webcell: run `webcell render --url <URL>` or see --help");
            Ok(())
        }
    }
}
