use super::env::CliArgs;
use super::info::cmd_info;
use super::serve::cmd_serve;
use super::step::cmd_step;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Serve(args) => cmd_serve(args, ctx).await,
        Commands::Step(args) => cmd_step(args, ctx).await,
        Commands::Info => cmd_info(ctx).await,
    }
}
