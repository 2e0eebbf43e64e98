use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    portsindex_cli::main_entry().await
}
