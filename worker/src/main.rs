mod config;
mod mapper;
mod master_client;
mod reducer;
mod server;
mod worker;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    worker::run().await
}
