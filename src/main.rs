use zkevm_aggregator::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    server::run().await
}
