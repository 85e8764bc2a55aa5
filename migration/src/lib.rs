pub use sea_orm_migration::prelude::*;

mod m20250901_000001_initial;
mod m20250903_000001_add_transactions_and_tickets;
mod m20250910_000001_add_balances_and_withdrawals;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250901_000001_initial::Migration),
            Box::new(m20250903_000001_add_transactions_and_tickets::Migration),
            Box::new(m20250910_000001_add_balances_and_withdrawals::Migration),
        ]
    }
}
