use crate::entities::UserRole;
use crate::middlewares::{current_user, require_role};
use crate::models::*;
use crate::services::{OrderService, SettlementService};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    post,
    path = "/orders",
    tag = "order",
    request_body = CreateOrderRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Pending transaction created, redirect the buyer to authorization_url", body = CreateOrderResponse),
        (status = 400, description = "Invalid cart"),
        (status = 409, description = "Not enough tickets left"),
        (status = 502, description = "Payment gateway unavailable")
    )
)]
pub async fn create_order(
    order_service: web::Data<OrderService>,
    req: HttpRequest,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse> {
    let user = match require_role(&req, &[UserRole::Attendee, UserRole::Organizer]) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match order_service.create_order(user.id, body.into_inner()).await {
        Ok(response) => Ok(HttpResponse::Ok().json(ApiResponse::success(response))),
        Err(e) => Ok(e.error_response()),
    }
}

/// Buyer returns from checkout; settles the order if the gateway confirms it
#[utoipa::path(
    get,
    path = "/payments/verify",
    tag = "order",
    params(VerifyPaymentQuery),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Payment confirmed, tickets issued", body = SettlementOutcome),
        (status = 402, description = "Payment was not successful"),
        (status = 404, description = "Unknown reference"),
        (status = 409, description = "Payment not complete yet or transaction already failed")
    )
)]
pub async fn verify_payment(
    settlement_service: web::Data<SettlementService>,
    req: HttpRequest,
    query: web::Query<VerifyPaymentQuery>,
) -> Result<HttpResponse> {
    if let Err(e) = current_user(&req) {
        return Ok(e.error_response());
    }

    match settlement_service.settle(&query.reference).await {
        Ok(outcome) => {
            let message = if outcome.has_shortfall() {
                "Payment confirmed, some tickets sold out and will be refunded"
            } else {
                "Payment confirmed"
            };
            Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(outcome, message)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

pub fn order_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/orders").route("", web::post().to(create_order)))
        .route("/payments/verify", web::get().to(verify_payment));
}
