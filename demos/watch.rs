//! Watch a PBX (or synthetic demo traffic) and print every notice.
//!
//! Run with: cargo run --example watch -- [config-file]
//!
//! Without a config file the listener starts in demo mode and the status
//! file appears under data/.

use callwatch::{CallListener, ListenerConfig, ListenerEvent};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "callwatch.toml".to_string());
    let config = ListenerConfig::load_or_default(Path::new(&config_path))?;

    let (listener, mut notices) = CallListener::new();
    listener.start(config);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("shutting down");
                break;
            }
            notice = notices.recv() => match notice {
                Some(ListenerEvent::Call(event)) => println!("call: {}", event),
                Some(ListenerEvent::StatusChanged(state)) => println!("listener is {}", state),
                Some(ListenerEvent::Error(err)) => eprintln!("error: {}", err),
                Some(_) => {}
                None => break,
            },
        }
    }

    listener
        .stop()
        .await;
    Ok(())
}
