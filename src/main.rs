//! tasty-agent
//!
//! Establishes a brokerage session and reports the account state.

use anyhow::Context;
use tasty_agent::{Config, TradingContext};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        base_url = %config.settings.api.base_url,
        model = config.model_identifier.as_deref().unwrap_or("unset"),
        "starting tasty-agent"
    );

    let ctx = TradingContext::from_config(&config)?;
    let session = ctx.session().await.context("establishing session")?;
    info!(account = %session.account_id, "session established");

    if ctx.api.market_is_open().await {
        info!("equities market is open");
    } else {
        info!("equities market is closed");
    }

    match ctx.api.balances().await {
        Ok(balances) => info!(
            net_liq = %balances.net_liquidating_value,
            cash = %balances.cash_balance,
            option_buying_power = %balances.derivative_buying_power,
            "account balances"
        ),
        Err(e) => warn!(error = %e, transient = e.is_transient(), "could not load balances"),
    }

    Ok(())
}
