use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info};

use super::PaymentGate;
use crate::now_unix;

/// Spawn a background task that periodically checks unpaid users' poll windows.
pub fn spawn_paywall_poller(gate: Arc<PaymentGate>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_interval = gate.config().poll_interval();

        loop {
            match gate.poll_once(now_unix()).await {
                Ok(0) => {}
                Ok(paid) => info!(paid, "paywall poll confirmed payments"),
                Err(err) => error!("paywall poll failed: {err}"),
            }

            sleep(poll_interval).await;
        }
    })
}
