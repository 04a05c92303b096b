use anyhow::Result;
use tpn_node::cli;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    cli::run().await
}
