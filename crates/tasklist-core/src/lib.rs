pub mod api;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod render;
pub mod storage;
pub mod task;

use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<ExitCode> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting tasklist CLI"
  );
  debug!(command = ?cli.command, "parsed command");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .rc_overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    storage::FileStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open session \
         store at {}",
        data_dir.display()
      )
    })?;

  let renderer =
    render::Renderer::new(&cfg)?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;

  let code = runtime.block_on(async {
    let api =
      api::HttpTaskApi::from_config(
        &cfg
      )?;
    let mut client =
      client::TaskListClient::new(
        api, store
      );

    commands::dispatch(
      &mut client,
      &cfg,
      &renderer,
      cli.command
    )
    .await
  })?;

  info!("done");
  Ok(code)
}
