use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    waypoint_cli::cli::run().await
}
