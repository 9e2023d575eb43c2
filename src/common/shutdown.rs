//! Shutdown signalling for the acquisition tasks
//!
//! One broadcast channel fans the stop request out to the producer and the
//! consumer task. Ctrl+C is one trigger; a finished fixed-length run is
//! another (the binary sends on the returned sender).

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shutdown signal type (unit type, just signals "shutdown now")
pub type ShutdownSignal = ();

/// Shutdown channel sender
pub type ShutdownSender = broadcast::Sender<ShutdownSignal>;

/// Shutdown channel receiver
pub type ShutdownReceiver = broadcast::Receiver<ShutdownSignal>;

/// Create a shutdown channel without any signal handler attached
pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    broadcast::channel::<ShutdownSignal>(1)
}

/// Setup shutdown handling with Ctrl+C signal
///
/// Returns (sender, receiver). Additional receivers come from
/// `sender.subscribe()`.
///
/// # Example
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = setup_shutdown();
/// sink.run(consumer, summary, shutdown_tx.subscribe()).await;
/// ```
pub fn setup_shutdown() -> (ShutdownSender, ShutdownReceiver) {
    let (tx, rx) = shutdown_channel();

    let tx_clone = tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, stopping acquisition");
                let _ = tx_clone.send(());
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    (tx, rx)
}
