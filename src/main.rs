use std::env;
use std::io;
use std::process::ExitCode;

use chrono::Utc;
use promo_eng::csv::{read_redemptions, read_rules, write_summary};
use promo_eng::{Engine, InMemoryStore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const ACTOR: &str = "system";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let (Some(rules_path), Some(redemptions_path)) = (args.next(), args.next()) else {
        error!("usage: promo-eng <rules.csv> <redemptions.csv>");
        return ExitCode::FAILURE;
    };

    for path in [&rules_path, &redemptions_path] {
        if !path.ends_with(".csv") {
            warn!(path, "input file seems to not be a csv file");
        }
    }

    let engine = Engine::new(InMemoryStore::new());

    let rules = match read_rules(&rules_path) {
        Ok(rules) => rules,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    for result in rules {
        match result {
            Ok(definition) => {
                let code = definition.code.clone();
                if let Err(e) = engine.create_rule(definition, ACTOR, Utc::now()) {
                    warn!(code = %code, "rule rejected: {e}");
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    let redemptions = match read_redemptions(&redemptions_path) {
        Ok(redemptions) => redemptions,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let (request_sender, request_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in redemptions {
            match result {
                Ok(request) => {
                    if request_sender.send(request).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(request_receiver)).await;

    let summary = match engine.summary() {
        Ok(summary) => summary,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = write_summary(io::stdout().lock(), summary) {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
