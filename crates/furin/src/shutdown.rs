use tokio::sync::watch;

/// Build a shutdown channel wired to SIGINT/SIGTERM.
///
/// The sender lives inside the signal handler, so the channel stays open
/// for the life of the process and every receiver wakes exactly once.
pub fn shutdown_channel() -> Result<watch::Receiver<()>, ctrlc::Error> {
    let (tx, rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Shutdown signal received, finishing up...");
        let _ = tx.send(());
    })?;
    Ok(rx)
}
