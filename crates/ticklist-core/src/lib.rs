pub mod backend;
pub mod celebrate;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod filter;
pub mod remote;
pub mod render;
pub mod state;
pub mod sync;
pub mod todo;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{
  debug,
  info
};

use crate::backend::PersistenceBackend;
use crate::celebrate::CelebrationScheduler;
use crate::sync::SyncLayer;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting ticklist"
  );
  debug!(
    rc_overrides = ?pre.rc_overrides,
    "preprocessed rc overrides"
  );

  let mut cfg = config::Config::load(
    cli.ticklistrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
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

  let backend =
    PersistenceBackend::from_config(
      &cfg, &data_dir
    )
    .context(
      "failed to set up persistence"
    )?;

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let command =
    cli.command.unwrap_or_default();
  let delay = cfg.celebrate_delay()?;
  let celebrate =
    cfg.celebrate_enabled();

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async move {
    let (tx, mut rx) =
      mpsc::unbounded_channel();
    let scheduler = if celebrate {
      CelebrationScheduler::new(
        tx, delay
      )
    } else {
      CelebrationScheduler::disabled()
    };

    let sync =
      SyncLayer::load(backend, scheduler)
        .await;

    commands::dispatch(
      &sync,
      &mut renderer,
      command
    )
    .await?;

    sync.celebrations().settle().await;
    while let Ok(celebration) =
      rx.try_recv()
    {
      renderer
        .print_celebration(celebration)?;
    }

    info!("done");
    Ok::<(), anyhow::Error>(())
  })
}
