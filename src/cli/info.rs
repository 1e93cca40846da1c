use anyhow::{Context, Result};

use crate::cli::context::CliContext;
use crate::config::{LlmProviderKind, SearchProviderKind, StorageBackend};

pub async fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();

    println!("Waypoint System Information");
    println!("===========================");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Config File: {}", ctx.config_path().display());
    println!();

    println!("Services:");
    println!(
        "- Listen Address: {}:{}",
        config.server.host, config.server.port
    );
    match config.llm.provider {
        LlmProviderKind::OpenAi => println!(
            "- Text Generation: OpenAI-compatible ({} at {}, {} key(s))",
            config.llm.model,
            config.llm.api_base,
            config.llm.api_keys.len()
        ),
        LlmProviderKind::Mock => println!("- Text Generation: offline mock"),
    }
    match config.search.provider {
        SearchProviderKind::Brave => println!(
            "- Web Search: Brave (key {})",
            if config.search.api_key.is_some() {
                "configured"
            } else {
                "missing"
            }
        ),
        SearchProviderKind::None => println!("- Web Search: disabled"),
    }
    match config.storage.backend {
        StorageBackend::Memory => println!("- Task Store: in-memory"),
        StorageBackend::File => match config.storage.resolved_dir() {
            Ok(dir) => println!("- Task Store: files under {}", dir.display()),
            Err(err) => println!("- Task Store: files ({err})"),
        },
    }
    println!();

    println!("Effective configuration (secrets redacted):");
    let rendered =
        serde_yaml::to_string(&config.redacted()).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
