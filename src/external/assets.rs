use crate::entities::ticket_entity as tk;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketAssets {
    pub qr_code_url: String,
    pub pdf_url: String,
}

/// Renders the QR image and PDF of an issued ticket and stores them.
/// Ticket validity never depends on this succeeding.
#[async_trait]
pub trait TicketAssetPipeline: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn render(&self, ticket: &tk::Model) -> AppResult<TicketAssets>;
}

pub struct UnconfiguredAssetPipeline;

#[async_trait]
impl TicketAssetPipeline for UnconfiguredAssetPipeline {
    fn is_configured(&self) -> bool {
        false
    }

    async fn render(&self, ticket: &tk::Model) -> AppResult<TicketAssets> {
        Err(AppError::ExternalApiError(format!(
            "no asset pipeline configured, cannot render {}",
            ticket.ticket_number
        )))
    }
}
