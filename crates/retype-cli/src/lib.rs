pub mod cli;
pub mod commands;

use clap::Parser;
use cli::Retype;
use commands::handle_command;
use retype_core::JsonConfigStore;
use std::process;

/// Run the retype CLI application
pub fn run_main() {
    let args = Retype::parse();
    let store = match args.config {
        Some(path) => JsonConfigStore::new(path),
        None => JsonConfigStore::open_default(),
    };

    if let Err(e) = handle_command(&store, args.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
