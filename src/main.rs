use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    electron_mock::cli::run().await
}
