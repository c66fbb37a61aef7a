use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP api
    Serve {
        /// Address to listen on, overrides the config
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Find the exact row and similar keywords for a query
    Search {
        keyword: String,

        /// Restrict candidates, e.g. `--scope seo="Team A"`.
        /// Repeatable, one per dimension.
        #[clap(short, long, value_parser = parse_scope)]
        scope: Vec<(String, String)>,
    },

    /// List available scope values
    Scopes {
        /// Only list values of this dimension
        #[clap(short, long)]
        dimension: Option<String>,

        /// Parent filter for `--dimension`, e.g. `--within seo="Team A"`
        #[clap(short, long, value_parser = parse_scope, requires = "dimension")]
        within: Vec<(String, String)>,
    },

    /// Pull records from the upstream store and merge them into the dataset
    Sync {
        /// Fetch everything instead of changes since the last sync
        #[clap(long, default_value = "false")]
        full: bool,
    },

    /// Merge upstream records from a JSON file
    /// (an array of `{"id", "fields"}` objects)
    Ingest { file: PathBuf },
}

/// Parse `name=value`.
pub fn parse_scope(value: &str) -> Result<(String, String), String> {
    let (name, value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <dimension>=<value>, got '{value}'"))?;

    let name = name.trim();
    if name.is_empty() {
        return Err("dimension name is empty".to_string());
    }

    Ok((name.to_string(), value.trim().to_string()))
}
