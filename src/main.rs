use clap::Parser;
use color_eyre::eyre::Result;
use planning_poker::{
    client,
    config::Cli,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let app_config = Cli::parse().into_config()?;
    let _guard = client::init_tracing(&app_config.log_dir)?;
    tracing::info!(game = %app_config.game_url, user = %app_config.user, "starting planning-poker client");
    client::run_app(app_config).await
}
