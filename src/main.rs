use anyhow::Result;
use bullsai::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
