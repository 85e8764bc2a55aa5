use crate::middlewares::current_user;
use crate::models::*;
use crate::services::TicketService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    get,
    path = "/tickets",
    tag = "ticket",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Tickets owned by the caller", body = [TicketResponse]),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_tickets(
    ticket_service: web::Data<TicketService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match ticket_service.list_for_attendee(user.id).await {
        Ok(tickets) => Ok(HttpResponse::Ok().json(ApiResponse::success(tickets))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/tickets/{id}",
    tag = "ticket",
    params(
        ("id" = i64, Path, description = "Ticket id")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Ticket detail", body = TicketResponse),
        (status = 404, description = "No such ticket for this user")
    )
)]
pub async fn get_ticket(
    ticket_service: web::Data<TicketService>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match ticket_service
        .get_for_attendee(user.id, path.into_inner())
        .await
    {
        Ok(ticket) => Ok(HttpResponse::Ok().json(ApiResponse::success(ticket))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/transactions",
    tag = "ticket",
    params(PaginationParams),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Caller's transactions, newest first"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_transactions(
    ticket_service: web::Data<TicketService>,
    req: HttpRequest,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match ticket_service.transaction_history(user.id, &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn ticket_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tickets")
            .route("", web::get().to(list_tickets))
            .route("/{id}", web::get().to(get_ticket)),
    )
    .route("/transactions", web::get().to(list_transactions));
}
