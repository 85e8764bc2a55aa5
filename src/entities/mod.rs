pub mod events;
pub mod organizer_balances;
pub mod platform_settings;
pub mod ticket_types;
pub mod tickets;
pub mod transactions;
pub mod users;
pub mod withdrawal_requests;

pub use events as event_entity;
pub use organizer_balances as organizer_balance_entity;
pub use platform_settings as platform_settings_entity;
pub use ticket_types as ticket_type_entity;
pub use tickets as ticket_entity;
pub use transactions as transaction_entity;
pub use users as user_entity;
pub use withdrawal_requests as withdrawal_request_entity;

pub use tickets::TicketStatus;
pub use transactions::{TransactionStatus, TransactionType};
pub use users::UserRole;
pub use withdrawal_requests::WithdrawalStatus;
