use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    about = "retype - system-wide text expansion",
    long_about = "retype watches what you type and replaces keywords with their expansions when you press a trigger key."
)]
pub struct Retype {
    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Watch the keyboard and expand keywords (default)
    Run,
    /// List all rules in match order
    List,
    /// Add a new rule
    Add {
        #[arg(long, short = 'k', help = "Keyword that triggers the expansion")]
        keyword: String,

        #[arg(long, short = 'r', help = "Text the keyword is replaced with")]
        replacement: String,
    },
    /// Update an existing rule
    Update {
        #[arg(long, short = 'k', help = "Keyword of the rule to update")]
        keyword: String,

        #[arg(long, short = 'r', help = "New replacement text")]
        replacement: String,
    },
    /// Delete a rule by keyword
    Delete {
        #[arg(long, short = 'k', help = "Keyword of the rule to delete")]
        keyword: String,
    },
    /// Print the config file path
    Config,
}
