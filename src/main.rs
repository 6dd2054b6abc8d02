use webhook_platform::config::Config;
use webhook_platform::server::Server;
use webhook_platform::telemetry;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    // Create and run server; delivery workers and the retry sweep run alongside it
    let server = Server::new(&config).await?;
    server.run().await
}
