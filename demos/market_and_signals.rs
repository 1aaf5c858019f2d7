use std::error::Error;

use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use tradedesk_realtime::registry::{ChannelRegistry, MARKET_CHANNEL, SIGNAL_CHANNEL};
use tradedesk_realtime::RegistryConfig;

const CONFIG: &str = r#"{
    "channels": {
        "market": { "url": "ws://localhost:8000/ws/market" },
        "signals": { "url": "ws://localhost:8000/ws/signals", "maxReconnectAttempts": 3 }
    }
}"#;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum SignalMessage {
    Signal {
        code: String,
        action: String,
        confidence: f64,
    },
    Alert {
        message: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let registry = ChannelRegistry::from_config(RegistryConfig::from_json(CONFIG)?)?;

        let market = registry.channel(MARKET_CHANNEL)?;
        market.subscribe("price_update", |data| println!("price_update {data}"))?;

        let signals = registry.channel(SIGNAL_CHANNEL)?;
        signals.subscribe_all_as(|message: SignalMessage| match message {
            SignalMessage::Signal {
                code,
                action,
                confidence,
            } => println!("signal code={code} action={action} confidence={confidence:.2}"),
            SignalMessage::Alert { message } => println!("alert {message}"),
        });

        registry.connect_all();
        tokio::signal::ctrl_c().await?;
        registry.disconnect_all();

        Ok::<(), Box<dyn Error>>(())
    })
}
