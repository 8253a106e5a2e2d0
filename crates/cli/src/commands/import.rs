use std::fs;
use std::path::Path;

use anyhow::Context;
use rentdesk_core::bulk::parse_bulk_lines;

use crate::commands::{open_inventory, prepare, CommandResult};

pub fn run(path: &Path, dry_run: bool) -> CommandResult {
    let raw = match fs::read_to_string(path)
        .with_context(|| format!("failed to read device list `{}`", path.display()))
    {
        Ok(raw) => raw,
        Err(error) => return CommandResult::failure("import", "input", format!("{error:#}"), 8),
    };

    let lines = match parse_bulk_lines(&raw) {
        Ok(lines) => lines,
        Err(error) => return CommandResult::failure("import", "input", error.to_string(), 8),
    };

    if dry_run {
        let preview = lines
            .iter()
            .map(|line| format!("{} (SL: {})", line.description, line.quantity))
            .collect::<Vec<_>>()
            .join("\n");
        return CommandResult::success("import", format!("dry run, {} lines:\n{preview}", lines.len()));
    }

    let (config, runtime) = match prepare("import") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let (pool, inventory) = open_inventory(&config).await?;
        let committed = inventory
            .mutate("import", |state| Ok(state.apply_bulk(&lines)))
            .await
            .map_err(|error| ("persistence", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(committed)
    });

    match result {
        Ok(committed) => CommandResult::success(
            "import",
            format!("revision {}\n{}", committed.revision, committed.value.render()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("import", error_class, message, exit_code)
        }
    }
}
