use crate::cli::Commands;
use retype_core::{logging, JsonConfigStore, Result, RuleSource};
use retype_daemon::run_foreground;
use std::io::{self, Write};
use tracing::info;

pub fn handle_command(store: &JsonConfigStore, command: Option<Commands>) -> Result<()> {
    match command.unwrap_or(Commands::Run) {
        Commands::Run => run(store),
        Commands::List => list_rules(store, &mut io::stdout()),
        Commands::Add {
            keyword,
            replacement,
        } => store
            .add_rule(&keyword, &replacement)
            .map(|_| println!("Rule added successfully")),
        Commands::Update {
            keyword,
            replacement,
        } => store
            .update_rule(&keyword, &replacement)
            .map(|_| println!("Rule updated successfully")),
        Commands::Delete { keyword } => store
            .delete_rule(&keyword)
            .map(|_| println!("Rule deleted successfully")),
        Commands::Config => {
            println!("{}", store.path().display());
            Ok(())
        }
    }
}

fn run(store: &JsonConfigStore) -> Result<()> {
    // Settings only pick the log level here; the runner loads them again with logging up
    let settings = store
        .read_config()
        .map(|config| config.settings)
        .unwrap_or_default();
    let _guard = logging::init(&settings);
    info!(config = %store.path().display(), "Starting retype");
    run_foreground(store)
}

fn list_rules(store: &JsonConfigStore, out: &mut impl Write) -> Result<()> {
    let rules = store.load()?;
    if rules.is_empty() {
        writeln!(out, "No rules defined")?;
        return Ok(());
    }

    let width = rules
        .iter()
        .map(|rule| rule.keyword.chars().count())
        .max()
        .unwrap_or(0);
    for rule in &rules {
        let preview = rule.replacement.replace('\n', "\\n");
        writeln!(out, "{:<width$}  {}", rule.keyword, preview, width = width)?;
    }
    Ok(())
}
