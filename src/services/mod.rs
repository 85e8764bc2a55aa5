pub mod balance_service;
pub mod fee_calculator;
pub mod inventory_guard;
pub mod order_service;
pub mod settings_service;
pub mod settlement_service;
pub mod ticket_service;
pub mod withdrawal_service;

pub use balance_service::*;
pub use order_service::*;
pub use settings_service::*;
pub use settlement_service::SettlementService;
pub use ticket_service::TicketService;
pub use withdrawal_service::*;
