use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// Capacity record of an event
/// - price: minor currency units
/// - sold: only ever raised through a guarded `sold + n <= quantity` update
/// - sale window is half open [sale_starts_at, sale_ends_at), NULL = unbounded
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "ticket_types")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
    pub sold: i32,
    pub max_per_order: i32,
    pub sale_starts_at: Option<DateTime<Utc>>,
    pub sale_ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn remaining(&self) -> i32 {
        (self.quantity - self.sold).max(0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
