use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;

use pharmabridge::config::Config;
use pharmabridge::httpclient::{HttpClient, HttpClientConfig, Transport};
use pharmabridge::orders::PartnerGateway;
use pharmabridge::server;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    verbose: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from the .env file
    dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.verbose.as_str())
        .init();

    let config = Config::from_env()?;

    // The two partner clients live for the whole process: one tuned for
    // lookups/status/cancel, one tuned for order creation.
    let query_http: Arc<dyn Transport> =
        Arc::new(HttpClient::new(HttpClientConfig::from(config.http))?);
    let create_http: Arc<dyn Transport> =
        Arc::new(HttpClient::new(HttpClientConfig::from(config.order_http))?);

    let gateway = Arc::new(PartnerGateway::new(
        config.partner_url.clone(),
        query_http,
        create_http,
    ));

    tracing::info!(partner_url = %config.partner_url, "Initialization finished");

    server::run_server(config.listen_port, gateway).await?;

    Ok(())
}
