use devnote_sync::{logging, AppConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    logging::init(&config.log_filter)?;
    devnote_sync::run(config).await
}
