use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;

use tracing::{debug, info, instrument, warn};

use crate::api::TaskApi;
use crate::cli::Command;
use crate::client::TaskListClient;
use crate::config::{self, Config};
use crate::render::Renderer;
use crate::storage::KeyValueStore;

/// Runs one command against the controller and renders the resulting state.
/// The exit code reflects whether the state ended with an error message.
#[instrument(skip(client, cfg, renderer))]
pub async fn dispatch<A, S>(
    client: &mut TaskListClient<A, S>,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<ExitCode>
where
    A: TaskApi,
    S: KeyValueStore,
{
    let resumed = client.restore_session()?;
    debug!(resumed, "session restored");

    match command {
        Command::Login { email } => {
            client.show_login();
            client.login(&email).await;
        }
        Command::Register { email, username } => {
            client.show_register();
            client.register(&email, &username).await;
        }
        Command::Logout => client.logout(),
        Command::List => client.fetch_tasks().await,
        Command::Add {
            title,
            description,
            status,
        } => client.add_task(&title, &description, Some(status)).await,
        Command::Status { id, status } => client.update_task_status(id, status).await,
        Command::Edit {
            id,
            title,
            description,
        } => client.edit_task(id, &title, &description).await,
        Command::Delete { id } => client.delete_task(id).await,
        Command::BulkDelete { ids, yes } => {
            cmd_bulk_delete(client, renderer, &ids, yes, &mut io::stdin().lock()).await?
        }
        Command::Export { dir } => cmd_export(client, cfg, dir.as_deref()).await?,
    }

    renderer.render(client.state())?;

    Ok(if client.state().error.is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[instrument(skip(client, renderer, input))]
async fn cmd_bulk_delete<A, S, R>(
    client: &mut TaskListClient<A, S>,
    renderer: &Renderer,
    ids: &[i64],
    assume_yes: bool,
    input: &mut R,
) -> anyhow::Result<()>
where
    A: TaskApi,
    S: KeyValueStore,
    R: BufRead,
{
    info!("command bulk-delete");

    client.fetch_tasks().await;
    if client.state().error.is_some() {
        return Ok(());
    }

    let wanted: BTreeSet<i64> = ids.iter().copied().collect();
    for id in wanted {
        if !client.toggle_selection(id) {
            warn!(task_id = id, "task is not in your list; skipping");
        }
    }

    if !client.request_bulk_delete() {
        return Ok(());
    }

    let confirmed = if assume_yes {
        true
    } else {
        renderer.render(client.state())?;
        confirm(input)?
    };

    if !confirmed {
        client.cancel_bulk_delete();
        println!("Bulk delete cancelled.");
        return Ok(());
    }

    for outcome in client.confirm_bulk_delete().await {
        match &outcome.result {
            Ok(()) => println!("Deleted task {}.", outcome.task_id),
            Err(err) => println!("Could not delete task {}: {err}", outcome.task_id),
        }
    }
    Ok(())
}

#[instrument(skip(client, cfg))]
async fn cmd_export<A, S>(
    client: &mut TaskListClient<A, S>,
    cfg: &Config,
    dir: Option<&Path>,
) -> anyhow::Result<()>
where
    A: TaskApi,
    S: KeyValueStore,
{
    info!("command export");

    client.fetch_tasks().await;
    if client.state().error.is_some() {
        return Ok(());
    }

    let dir = config::resolve_export_dir(cfg, dir)?;
    let path = client.export_to_csv(&dir)?;
    println!(
        "Exported {} task(s) to {}.",
        client.state().tasks.len(),
        path.display()
    );
    Ok(())
}

fn confirm<R: BufRead>(input: &mut R) -> anyhow::Result<bool> {
    print!("Proceed? [y/N] ");
    io::stdout().flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
