use clap::Parser;
use tracing_subscriber::FmtSubscriber;

use nfldap::{Config, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = nfldap::config::CliArgs::parse();
    let config = Config::from_cli_args(args)?;

    FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .init();

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
