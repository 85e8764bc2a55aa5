//! Recurring background jobs. Call `spawn_all` once during startup.

use crate::services::{SettlementService, TicketService};
use std::time::Duration;

const EXPIRY_INTERVAL: Duration = Duration::from_secs(60);
const ASSET_BACKFILL_INTERVAL: Duration = Duration::from_secs(300);
const BATCH_SIZE: u64 = 100;

/// Spawns the pending-order expiry sweep and the ticket asset backfill.
/// Both are safe to run while requests are being served: every change
/// they make goes through the same guarded updates as the request path.
pub fn spawn_all(
    settlement_service: SettlementService,
    ticket_service: TicketService,
    pending_order_ttl: chrono::Duration,
) {
    // unconfirmed orders past their window: one last verify, then failed
    {
        let svc = settlement_service.clone();
        tokio::spawn(async move {
            loop {
                match svc.expire_stale_pending(pending_order_ttl, BATCH_SIZE).await {
                    Ok(n) if n > 0 => log::info!("Expired pending orders: {n}"),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to expire pending orders: {e:?}"),
                }
                tokio::time::sleep(EXPIRY_INTERVAL).await;
            }
        });
    }

    // QR/PDF for tickets whose first render failed
    {
        let svc = ticket_service.clone();
        tokio::spawn(async move {
            loop {
                match svc.backfill_assets(BATCH_SIZE).await {
                    Ok(n) if n > 0 => log::info!("Ticket assets backfilled: {n}"),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to backfill ticket assets: {e:?}"),
                }
                tokio::time::sleep(ASSET_BACKFILL_INTERVAL).await;
            }
        });
    }
}
