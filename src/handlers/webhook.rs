use crate::error::AppError;
use crate::models::PaystackWebhookEvent;
use crate::services::SettlementService;
use actix_web::{HttpResponse, Result, web};
use log::{error, info, warn};

/// Paystack webhook. The body only tells us which reference to look at:
/// settlement re-verifies with the gateway before issuing anything.
///
/// Always answers 200 once the body parses, so the gateway stops retrying;
/// anything left pending is picked up by the buyer's verify call or the
/// expiry sweep.
pub async fn paystack_webhook(
    body: web::Bytes,
    settlement_service: web::Data<SettlementService>,
) -> Result<HttpResponse> {
    let event: PaystackWebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Unreadable Paystack webhook body: {e}");
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Invalid payload"
            })));
        }
    };

    info!(
        "Received Paystack webhook event: {} ({})",
        event.event, event.data.reference
    );

    if event.event != "charge.success" {
        info!("Unhandled webhook event type: {}", event.event);
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true })));
    }

    match settlement_service.settle(&event.data.reference).await {
        Ok(outcome) => {
            info!(
                "Webhook settlement of {}: {:?}",
                event.data.reference, outcome.status
            );
        }
        Err(AppError::ExternalVerificationFailure { reference, reason }) => {
            warn!("Webhook for {reference} did not verify: {reason}");
        }
        Err(e) => {
            error!(
                "Failed to settle {} from webhook: {e}",
                event.data.reference
            );
        }
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true })))
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhook").route("/paystack", web::post().to(paystack_webhook)));
}
