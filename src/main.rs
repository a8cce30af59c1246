use std::sync::Arc;

use anyhow::Context;
use sharenode::config::ServerConfig;
use sharenode::dispatcher::Dispatcher;
use sharenode::inventory::Inventory;
use sharenode::lifecycle;
use sharenode::multicast::MulticastEndpoint;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_args().map_err(|e| {
        tracing::error!(error = %e, "startup configuration error");
        e
    })?;

    let inventory = Inventory::index(&config.shared_folder, config.max_space)
        .context("failed to index shared folder")?;
    tracing::info!(
        dir = %config.shared_folder.display(),
        available_space = inventory.available_space(),
        negative_space = inventory.negative_space(),
        "indexed shared folder"
    );

    let cmd = Arc::new(
        MulticastEndpoint::open(config.mcast_addr, config.cmd_port)
            .context("failed to open multicast command channel")?,
    );
    tracing::info!(group = %config.mcast_addr, port = config.cmd_port, "joined multicast group");

    let dispatcher = Dispatcher::new(cmd.clone(), inventory, &config);
    let pending = dispatcher.pending_uploads();

    let cancel = CancellationToken::new();

    let lifecycle_cancel = cancel.clone();
    let lifecycle_cmd = cmd.clone();
    let lifecycle_pending = pending.clone();
    let lifecycle_task = tokio::spawn(async move {
        lifecycle::run_until_interrupted(lifecycle_cancel, lifecycle_cmd, lifecycle_pending).await;
    });

    let dispatch_result = dispatcher.run(cancel.clone()).await;

    if dispatch_result.is_err() {
        // A fatal socket error in the dispatcher runs the same
        // cleanup the SIGINT path would have run.
        cancel.cancel();
        cmd.close();
        pending.unlink_all();
    }

    lifecycle_task.abort();

    match dispatch_result {
        Ok(()) => std::process::exit(if cancel.is_cancelled() { 1 } else { 0 }),
        Err(e) => {
            tracing::error!(error = %e, "dispatcher exited fatally");
            std::process::exit(1);
        }
    }
}
