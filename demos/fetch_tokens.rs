use std::env;

use daikin_residential::{Credentials, DaikinClient};

/// Logs in with email and password, saves the resulting token set to
/// tokenset.json and prints a summary of the account's devices. Mind the
/// vendor's daily login rate limit when running this repeatedly.
#[tokio::main]
async fn main() -> daikin_residential::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let (email, password) = match (args.get(1), args.get(2)) {
        (Some(e), Some(p)) => (e.clone(), p.clone()),
        _ => {
            eprintln!("usage: fetch_tokens <email> <password> [tokenset.json]");
            std::process::exit(2);
        }
    };
    let out_path = args
        .get(3)
        .cloned()
        .unwrap_or_else(|| "tokenset.json".to_string());

    let mut client = DaikinClient::builder()
        .credentials(Credentials::new(email, password))
        .build();

    println!("Logging in...");
    client.login().await?;
    if let Some(tokens) = client.token_set() {
        tokens.save(&out_path)?;
        println!("Token set saved to {out_path}");
    }

    let count = client.discover().await?;
    println!("Found {count} device(s):");
    for device in client.devices() {
        println!(
            "  {}: {} (model {}, firmware {})",
            device.id(),
            device.name().unwrap_or("<unnamed>"),
            device.model().unwrap_or("?"),
            device.firmware_version().unwrap_or_else(|| "?".to_string()),
        );
    }
    Ok(())
}
