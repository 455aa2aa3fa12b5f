// cli-bin/src/cli/watch.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use crossbeam_channel::{after, bounded, never, select, tick, Receiver};
use libshelf::{ChannelNotifier, Notification, Shelf};
use tracing::{info, warn};

use crate::cli::{print_json, Format};

/// How often the run loop logs a status line.
const STATUS_EVERY: Duration = Duration::from_secs(60);

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Reconcile every library once before monitoring starts
    #[arg(long)]
    pub rescan_first: bool,

    /// Full rescan interval in seconds (overrides SHELF_RESCAN_INTERVAL_SECS)
    #[arg(long)]
    pub rescan_every: Option<u64>,

    /// Debounce window for deletes in milliseconds
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Stop on its own after this many seconds
    #[arg(long, hide = true)]
    pub exit_after: Option<u64>,
}

pub fn run(args: &WatchArgs, shelf: &Shelf, fmt: Format) -> Result<()> {
    let mut config = shelf.config().monitor.clone();
    if let Some(ms) = args.debounce_ms {
        config.debounce = Duration::from_millis(ms);
    }
    if let Some(secs) = args.rescan_every {
        config.rescan_interval = (secs > 0).then(|| Duration::from_secs(secs));
    }
    let rescan_interval = config.rescan_interval;

    let notifier = Arc::new(ChannelNotifier::new());
    let notifications = notifier.subscribe();
    let monitor = shelf.start_monitor(config, notifier)?;

    if args.rescan_first {
        monitor.rescan_all()?;
    }

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Stopping monitor...");
        let _ = stop_tx.try_send(());
    })?;

    let rescans: Receiver<_> = rescan_interval.map(tick).unwrap_or_else(never);
    let deadline: Receiver<_> = args
        .exit_after
        .map(|s| after(Duration::from_secs(s)))
        .unwrap_or_else(never);
    let status = tick(STATUS_EVERY);

    let st = monitor.status()?;
    info!(paths = st.watched.len(), "Monitoring started. Press Ctrl+C to stop.");

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(deadline) -> _ => break,
            recv(notifications) -> msg => {
                if let Ok(n) = msg {
                    report(&n, fmt)?;
                }
            }
            recv(rescans) -> _ => {
                if let Err(e) = monitor.rescan_all() {
                    warn!(error = %e, "periodic rescan failed");
                }
            }
            recv(status) -> _ => {
                let st = monitor.status()?;
                info!(
                    paths = st.watched.len(),
                    paused = st.paused,
                    pending_deletions = st.pending_deletions,
                    processed = st.dispatch.processed,
                    dropped = st.dispatch.dropped,
                    raw_dropped = st.raw_dropped,
                    "monitor status"
                );
            }
        }
    }

    monitor.shutdown();
    // whatever arrived while shutting down
    for n in notifications.try_iter() {
        report(&n, fmt)?;
    }
    info!("Monitor stopped.");
    Ok(())
}

fn report(n: &Notification, fmt: Format) -> Result<()> {
    match fmt {
        Format::Text => println!("{n}"),
        Format::Json => print_json(n)?,
    }
    Ok(())
}
