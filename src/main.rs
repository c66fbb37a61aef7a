use std::collections::BTreeMap;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod dataset;
mod errors;
mod ingest;
mod lock;
mod matcher;
mod normalize;
mod profile;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use errors::MatchError;
use ingest::UpstreamRecord;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base_path = config::base_path()?;
    let config = Config::load_with(&base_path)?;
    let app = app::App::new(&config)?;

    match args.command {
        cli::Command::Serve { listen } => {
            let listen_addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            web::start_daemon(app, &listen_addr)
        }

        cli::Command::Search { keyword, scope } => {
            let filters: BTreeMap<String, String> = scope.into_iter().collect();
            match app.search(&keyword, &filters) {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(())
                }
                Err(MatchError::NoSimilar { exact }) => {
                    println!("no similar keywords found");
                    if let Some(exact) = exact {
                        println!("{}", serde_json::to_string_pretty(&exact)?);
                    }
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }

        cli::Command::Scopes { dimension, within } => {
            match dimension {
                Some(dimension) => {
                    let within: BTreeMap<String, String> = within.into_iter().collect();
                    let values = app.scope_values(&dimension, &within)?;
                    println!("{}", serde_json::to_string_pretty(&values)?);
                }
                None => println!("{}", serde_json::to_string_pretty(&app.scopes())?),
            }
            Ok(())
        }

        cli::Command::Sync { full } => {
            let report = app.sync(full)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        cli::Command::Ingest { file } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("couldnt read {}", file.display()))?;
            let records: Vec<UpstreamRecord> =
                serde_json::from_slice(&data).context("expected a JSON array of records")?;

            let report = app.ingest_records(&records)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
