//! Stream one completion from OpenRouter through the adaptive controller.
//!
//! Starts with a deliberately small output budget so the first attempt is
//! likely to be cut off, then prints every message the controller forwards,
//! including its status messages, followed by the captured logs.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run --example resilient_stream
//! ```

use futures::StreamExt;
use rebound::logging::CaptureLayer;
use rebound::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), String> {
    let (layer, logs) = CaptureLayer::new();
    tracing_subscriber::registry().with(layer).init();

    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let client = OpenRouterClient::new(api_key).map_err(|e| e.to_string())?;
    let client = Retrying::new(client, RetryConfig::default());

    let config = ResilienceConfig::default()
        .with_baseline_max_tokens(64)
        .with_token_ceiling(1024)
        .with_attempts_limit(4)
        .with_diagnostics(true);

    let messages = vec![
        Message::system("You are a patient tutor."),
        Message::user("Explain how a hash map resolves collisions, with an example."),
    ];
    let options = CompletionOptions::new("anthropic/claude-sonnet-4").with_max_tokens(64);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut stream = run(messages, cancel, options, &client, config);
    while let Some(item) = stream.next().await {
        let message = item.map_err(|e| e.to_string())?;
        match message.status_kind() {
            Some(kind) => println!("\n[{kind}] {}", message.text()),
            None => print!("{}", message.text()),
        }
    }

    println!("\n\n--- logs ---");
    for line in logs.drain() {
        println!("{} {:?} {}", line.time, line.level, line.render());
    }

    Ok(())
}
