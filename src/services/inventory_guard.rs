//! Availability rules for a ticket type. No I/O, the caller supplies the
//! clock so the same rules run at order time and again at settlement.

use crate::entities::ticket_type_entity as tt;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    InvalidQuantity,
    Inactive,
    OutsideSaleWindow,
    ExceedsRemaining { remaining: i32 },
    ExceedsMaxPerOrder { max_per_order: i32 },
}

pub fn in_sale_window(ticket_type: &tt::Model, at: DateTime<Utc>) -> bool {
    let started = ticket_type.sale_starts_at.is_none_or(|start| at >= start);
    let not_ended = ticket_type.sale_ends_at.is_none_or(|end| at < end);
    started && not_ended
}

pub fn check(ticket_type: &tt::Model, quantity: i32, at: DateTime<Utc>) -> Availability {
    if quantity < 1 {
        return Availability::InvalidQuantity;
    }
    if !ticket_type.is_active {
        return Availability::Inactive;
    }
    if !in_sale_window(ticket_type, at) {
        return Availability::OutsideSaleWindow;
    }
    let remaining = ticket_type.remaining();
    if quantity > remaining {
        return Availability::ExceedsRemaining { remaining };
    }
    if quantity > ticket_type.max_per_order {
        return Availability::ExceedsMaxPerOrder {
            max_per_order: ticket_type.max_per_order,
        };
    }
    Availability::Available
}

/// Order-time check, any failure rejects the cart
pub fn ensure_available(
    ticket_type: &tt::Model,
    quantity: i32,
    at: DateTime<Utc>,
) -> AppResult<()> {
    match check(ticket_type, quantity, at) {
        Availability::Available => Ok(()),
        Availability::InvalidQuantity => Err(AppError::ValidationError(format!(
            "quantity for ticket type {} must be at least 1",
            ticket_type.id
        ))),
        Availability::Inactive => Err(AppError::ValidationError(format!(
            "ticket type {} is not on sale",
            ticket_type.id
        ))),
        Availability::OutsideSaleWindow => Err(AppError::ValidationError(format!(
            "ticket type {} is outside its sale window",
            ticket_type.id
        ))),
        Availability::ExceedsRemaining { remaining } => Err(AppError::InsufficientCapacity {
            ticket_type_id: ticket_type.id,
            requested: quantity,
            available: remaining,
        }),
        Availability::ExceedsMaxPerOrder { max_per_order } => {
            Err(AppError::ValidationError(format!(
                "at most {max_per_order} tickets of type {} per order",
                ticket_type.id
            )))
        }
    }
}

/// Settlement-time check: how many of `requested` units may still be issued.
/// Live counters decide capacity, the sale window is judged at `ordered_at`.
pub fn grantable(ticket_type: &tt::Model, requested: i32, ordered_at: DateTime<Utc>) -> i32 {
    if requested < 1 || !ticket_type.is_active || !in_sale_window(ticket_type, ordered_at) {
        return 0;
    }
    requested
        .min(ticket_type.remaining())
        .min(ticket_type.max_per_order)
        .max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ticket_type(quantity: i32, sold: i32) -> tt::Model {
        let now = Utc::now();
        tt::Model {
            id: 1,
            event_id: 1,
            name: "Regular".into(),
            price: 2500,
            quantity,
            sold,
            max_per_order: 5,
            sale_starts_at: Some(now - Duration::days(1)),
            sale_ends_at: Some(now + Duration::days(1)),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn available_within_all_limits() {
        let t = ticket_type(10, 4);
        assert_eq!(check(&t, 5, Utc::now()), Availability::Available);
        assert!(ensure_available(&t, 5, Utc::now()).is_ok());
    }

    #[test]
    fn capacity_and_per_order_limits() {
        let t = ticket_type(10, 8);
        assert_eq!(
            check(&t, 3, Utc::now()),
            Availability::ExceedsRemaining { remaining: 2 }
        );
        assert!(matches!(
            ensure_available(&t, 3, Utc::now()),
            Err(AppError::InsufficientCapacity {
                requested: 3,
                available: 2,
                ..
            })
        ));

        let t = ticket_type(100, 0);
        assert_eq!(
            check(&t, 6, Utc::now()),
            Availability::ExceedsMaxPerOrder { max_per_order: 5 }
        );
    }

    #[test]
    fn sale_window_is_half_open() {
        let mut t = ticket_type(10, 0);
        let end = Utc::now();
        t.sale_ends_at = Some(end);
        assert_eq!(check(&t, 1, end), Availability::OutsideSaleWindow);
        assert_eq!(
            check(&t, 1, end - Duration::seconds(1)),
            Availability::Available
        );

        let start = t.sale_starts_at.unwrap();
        assert_eq!(check(&t, 1, start), Availability::Available);
        assert_eq!(
            check(&t, 1, start - Duration::seconds(1)),
            Availability::OutsideSaleWindow
        );

        t.sale_starts_at = None;
        t.sale_ends_at = None;
        assert_eq!(
            check(&t, 1, end + Duration::days(365)),
            Availability::Available
        );
    }

    #[test]
    fn inactive_and_zero_quantity() {
        let mut t = ticket_type(10, 0);
        assert_eq!(check(&t, 0, Utc::now()), Availability::InvalidQuantity);
        t.is_active = false;
        assert_eq!(check(&t, 1, Utc::now()), Availability::Inactive);
        assert_eq!(grantable(&t, 1, Utc::now()), 0);
    }

    #[test]
    fn grantable_clamps_to_what_is_left() {
        let t = ticket_type(10, 9);
        assert_eq!(grantable(&t, 3, Utc::now()), 1);

        let t = ticket_type(10, 10);
        assert_eq!(grantable(&t, 1, Utc::now()), 0);

        // window judged at order time, not now
        let mut t = ticket_type(10, 0);
        let ordered_at = Utc::now() - Duration::minutes(5);
        t.sale_ends_at = Some(Utc::now() - Duration::minutes(1));
        assert_eq!(grantable(&t, 2, ordered_at), 2);
        assert_eq!(grantable(&t, 2, Utc::now()), 0);
    }
}
