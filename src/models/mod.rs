pub mod balance;
pub mod common;
pub mod order;
pub mod pagination;
pub mod settings;
pub mod settlement;
pub mod ticket;
pub mod withdrawal;

pub use balance::*;
pub use common::*;
pub use order::*;
pub use pagination::*;
pub use settings::*;
pub use settlement::*;
pub use ticket::*;
pub use withdrawal::*;
