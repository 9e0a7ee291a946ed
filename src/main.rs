use tracing::{info, warn};

use exnova::ExnovaError;
use exnova::bot::Bot;
use exnova::client::ExnovaClient;
use exnova::config::fetch_config;
use exnova::credentials;
use exnova::mirror::MirrorClient;

#[tokio::main]
async fn main() -> Result<(), ExnovaError> {
    // Initialize tracing subscriber for logging output.
    tracing_subscriber::fmt::init();

    credentials::populate_env_from_keychain();
    let app_config = fetch_config()?;

    let mirror = app_config
        .supabase
        .as_ref()
        .map(MirrorClient::new)
        .transpose()?;
    if mirror.is_none() {
        warn!("no backend mirror configured, dashboard state will not sync");
    }

    let client = ExnovaClient::new(app_config.exnova.clone())?;
    client.connect().await?;
    client.change_balance(app_config.trading.account).await?;

    let profile = client.get_profile().await?;
    let balance = client.get_balance().await?;
    info!(
        name = profile.name.as_deref().unwrap_or("unknown"),
        account = app_config.trading.account.as_str(),
        currency = %profile.currency_char,
        %balance,
        "logged in"
    );

    let mut bot = Bot::new(client.clone(), app_config.trading, mirror);
    tokio::select! {
        result = bot.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    client.close().await;
    Ok(())
}
