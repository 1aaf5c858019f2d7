use std::error::Error;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use tradedesk_realtime::{ChannelClient, ChannelHooks, ChannelOptions};

#[derive(Debug, Deserialize)]
struct PriceUpdate {
    code: String,
    price: i64,
    change_rate: f64,
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
        let client = ChannelClient::builder(ChannelOptions::new("ws://localhost:8000/ws/market"))
            .with_name("market")
            .with_hooks(
                ChannelHooks::new()
                    .on_open(|| println!("market stream open"))
                    .on_close(|| println!("market stream closed"))
                    .on_error(|err| eprintln!("market stream error: {err}"))
                    .on_reconnect_exhausted(|| eprintln!("market stream gave up reconnecting")),
            )
            .build()?;

        let quotes = client.subscribe_as("price_update", |update: PriceUpdate| {
            println!(
                "code={} price={} change_rate={:.2}%",
                update.code, update.price, update.change_rate
            );
        })?;

        client.connect();
        let opened = tokio::time::timeout(Duration::from_secs(10), async {
            while !client.is_connected() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        if opened.is_ok() {
            client.send_json("subscribe", &serde_json::json!({ "codes": ["005930", "000660"] }))?;
        }

        tokio::signal::ctrl_c().await?;
        quotes.unsubscribe();
        client.disconnect();

        Ok::<(), Box<dyn Error>>(())
    })
}
