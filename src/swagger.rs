use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{TicketStatus, TransactionStatus, TransactionType, WithdrawalStatus};
use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::order::create_order,
        handlers::order::verify_payment,
        handlers::ticket::list_tickets,
        handlers::ticket::get_ticket,
        handlers::ticket::list_transactions,
        handlers::organizer::get_balance,
        handlers::organizer::request_withdrawal,
        handlers::organizer::list_withdrawals,
        handlers::organizer::event_stats,
        handlers::admin::list_withdrawals,
        handlers::admin::review_withdrawal,
        handlers::admin::process_withdrawal,
        handlers::admin::get_settings,
        handlers::admin::update_settings,
        handlers::admin::platform_stats,
    ),
    components(
        schemas(
            OrderItemRequest,
            CreateOrderRequest,
            CreateOrderResponse,
            OrderLine,
            SettlementStatus,
            SettlementOutcome,
            Shortfall,
            TicketResponse,
            TicketStatus,
            TransactionResponse,
            TransactionStatus,
            TransactionType,
            EventStatsResponse,
            PlatformStatsResponse,
            BalanceResponse,
            CreateWithdrawalRequest,
            ReviewAction,
            ReviewWithdrawalRequest,
            ProcessWithdrawalRequest,
            WithdrawalResponse,
            WithdrawalStatus,
            SettingsResponse,
            UpdateSettingsRequest,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "order", description = "Checkout and payment confirmation"),
        (name = "ticket", description = "Attendee tickets and transactions"),
        (name = "organizer", description = "Organizer balance, withdrawals and sales"),
        (name = "admin", description = "Withdrawal review, platform settings and statistics"),
    ),
    info(
        title = "Ticketing Backend API",
        version = "1.0.0",
        description = "Ticket sales, settlement and organizer payouts"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
