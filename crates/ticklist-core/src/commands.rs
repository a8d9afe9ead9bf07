use anyhow::anyhow;
use tracing::{debug, info};

use crate::cli::Command;
use crate::render::{Renderer, short_id};
use crate::sync::SyncLayer;

#[tracing::instrument(skip(sync, renderer))]
pub async fn dispatch(
    sync: &SyncLayer,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    info!(backend = sync.backend().kind(), "dispatching command");

    match command {
        Command::List { filter } => {
            sync.set_filter(filter);
            renderer.print_todo_table(&sync.filtered(), filter)?;
            renderer.print_status(sync.counts())?;
        }
        Command::Add { text } => {
            let text = text.join(" ");
            let (outcome, record) = sync.add(&text).await;
            let done = record
                .map(|todo| format!("Added {} {}.", short_id(&todo.id), todo.text))
                .unwrap_or_default();
            renderer.print_outcome(outcome, &done, "Nothing to add: text is blank.")?;
        }
        Command::Toggle { id } => {
            let id = resolve(sync, &id)?;
            let outcome = sync.toggle(&id).await;
            let state = sync
                .with_state(|s| s.get(&id).map(|t| t.completed))
                .map(|completed| if completed { "completed" } else { "active" })
                .unwrap_or("gone");
            renderer.print_outcome(
                outcome,
                &format!("Marked {} {state}.", short_id(&id)),
                "Nothing to toggle.",
            )?;
        }
        Command::Edit { id, text } => {
            let id = resolve(sync, &id)?;
            let outcome = sync.edit(&id, &text.join(" ")).await;
            renderer.print_outcome(
                outcome,
                &format!("Updated {}.", short_id(&id)),
                "Nothing to update: text is blank.",
            )?;
        }
        Command::Delete { id } => {
            let id = resolve(sync, &id)?;
            let outcome = sync.delete(&id).await;
            renderer.print_outcome(
                outcome,
                &format!("Deleted {}.", short_id(&id)),
                "Nothing to delete.",
            )?;
        }
        Command::ClearCompleted => {
            let before = sync.counts().completed;
            let outcome = sync.clear_completed().await;
            renderer.print_outcome(
                outcome,
                &format!("Cleared {before} completed task(s)."),
                "No completed tasks to clear.",
            )?;
        }
        Command::Stats => {
            renderer.print_counts(sync.counts(), sync.backend().kind())?;
        }
    }

    Ok(())
}

/// Resolves a unique id prefix against the loaded collection.
fn resolve(sync: &SyncLayer, prefix: &str) -> anyhow::Result<String> {
    let resolved = sync
        .resolve_id(prefix)
        .ok_or_else(|| anyhow!("no single task matches id {prefix:?}"))?;
    debug!(prefix, id = %resolved, "resolved task id");
    Ok(resolved)
}
