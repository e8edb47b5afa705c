//! Interactive vault on the terminal, with the keyboard standing in for the
//! fingerprint sensor.
//!
//! Run with: `cargo run --example console_prompt`
//!
//! Commands: `seal <secret>`, `open`, `state`, `reset`, `audit`, `quit`.
//! While a prompt is showing, answer `y` (verified), `n` (cancel), or `f`
//! (not recognized).
//!
//! Configuration comes from the `SEALGATE_*` environment variables; set
//! `SEALGATE_LOG_FORMAT=json` for JSON logs.

use std::sync::{Arc, Mutex};

use sealgate::logging::{self, LogFormat};
use sealgate::{
    BiometricPrompt, Bridge, ChannelSink, FailureReason, FileStore, PromptInfo, PromptResponder,
    SoftwareKeyStore, VaultConfig, VaultController,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Holds the responder of the prompt currently on screen.
#[derive(Default)]
struct ConsolePrompt {
    showing: Mutex<Option<PromptResponder>>,
}

impl ConsolePrompt {
    fn take(&self) -> Option<PromptResponder> {
        self.showing.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl BiometricPrompt for ConsolePrompt {
    fn can_authenticate(&self) -> bool {
        true
    }

    fn authenticate(&self, info: &PromptInfo, responder: PromptResponder) {
        println!("== {} ==", info.title);
        println!("{}", info.subtitle);
        println!("[y] touch sensor  [n] {}  [f] wrong finger", info.negative_button);
        if let Ok(mut slot) = self.showing.lock() {
            *slot = Some(responder);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init(LogFormat::from_env());

    // 1. Wire the vault.
    let config = VaultConfig::from_env();
    let store = Arc::new(FileStore::open(&config.data_dir)?);
    let prompt = Arc::new(ConsolePrompt::default());
    let (sink, mut events) = ChannelSink::channel();
    let sink = Arc::new(sink);

    let vault = VaultController::new(
        config.clone(),
        Arc::new(SoftwareKeyStore::new()),
        store,
        prompt.clone(),
        sink.clone(),
    )
    .spawn();
    let device_id = std::env::var("SEALGATE_DEVICE_ID").unwrap_or_else(|_| "console".into());
    let bridge = Bridge::new(vault.clone(), sink, device_id);

    // 2. Print every notification as the caller would receive it.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.to_json() {
                Ok(json) => println!("<- {json}"),
                Err(e) => eprintln!("could not encode notification: {e}"),
            }
        }
    });

    println!("device {}; records in {}", bridge.device_identity(), config.data_dir.display());

    // 3. Read commands, or prompt answers while a prompt is showing.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();

        if let Some(responder) = prompt.take() {
            match line {
                "y" => responder.approve(),
                "n" => responder.cancel(),
                _ => responder.fail(FailureReason::NotRecognized),
            }
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("seal", secret) if !secret.is_empty() => bridge.seal_request(secret.to_string()).await,
            ("open", _) => bridge.open_request().await,
            ("state", _) => println!("{}", serde_json::to_string(&vault.state().await?)?),
            ("reset", _) => match vault.reset().await {
                Ok(()) => println!("vault reset"),
                Err(e) => println!("reset refused: {e}"),
            },
            ("audit", _) => {
                for record in vault.audit_trail().await? {
                    println!(
                        "  #{} {:?} {} @ {}",
                        record.ticket, record.operation, record.outcome, record.timestamp
                    );
                }
            }
            ("quit", _) => break,
            ("", _) => {}
            _ => println!("commands: seal <secret> | open | state | reset | audit | quit"),
        }
    }

    Ok(())
}
