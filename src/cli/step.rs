use std::path::{Path, PathBuf};

use agent_core::StepRequest;
use anyhow::{Context, Result};
use clap::Args;
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::app_context::AppContext;
use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct StepArgs {
    /// JSON step request file, or `-` for stdin
    #[arg(long, value_name = "FILE")]
    pub request: PathBuf,

    /// Pretty-print the response
    #[arg(long)]
    pub pretty: bool,
}

pub async fn cmd_step(args: StepArgs, ctx: &CliContext) -> Result<()> {
    let raw = read_request(&args.request).await?;
    let request: StepRequest =
        serde_json::from_str(&raw).context("Failed to parse step request JSON")?;

    let app = AppContext::from_config(ctx.config().clone())?;
    let response = app
        .engine()
        .step(request)
        .await
        .context("Decision cycle failed")?;
    info!(
        task_id = %response.task_id,
        status = ?response.status,
        action = ?response.action,
        "step decided"
    );

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{rendered}");
    Ok(())
}

async fn read_request(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buffer)
            .await
            .context("Failed to read step request from stdin")?;
        return Ok(buffer);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read step request {}", path.display()))
}
