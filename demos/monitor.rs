use std::env;
use std::time::Duration;

use daikin_residential::{DaikinClient, TokenSet};

#[tokio::main]
async fn main() -> daikin_residential::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let tokenset_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "tokenset.json".to_string());

    let tokens = TokenSet::load(&tokenset_path)?;
    let save_path = tokenset_path.clone();

    let mut client = DaikinClient::builder()
        .token_set(tokens)
        .on_token_update(move |tokens| {
            if let Err(e) = tokens.save(&save_path) {
                eprintln!("failed to persist refreshed tokens: {e}");
            }
        })
        .on_device_update(|device| {
            println!(
                "[{}] mode: {:?} | room: {} | target: {} | outdoor: {}{}",
                device.name().unwrap_or_else(|| device.id()),
                device.hvac_mode(),
                fmt_temp(device.room_temperature()),
                fmt_temp(device.target_temperature()),
                fmt_temp(device.outdoor_temperature()),
                if device.is_in_error_state() {
                    " | ERROR"
                } else {
                    ""
                },
            );
        })
        .build();

    let count = client.discover().await?;
    println!("Discovered {count} device(s). Polling for updates...");

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        if let Err(e) = client.update_all().await {
            eprintln!("Update error: {e}");
        }
    }
}

fn fmt_temp(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}\u{00b0}C"),
        None => "-".to_string(),
    }
}
