pub mod code_generator;
pub mod jwt;

pub use code_generator::{
    generate_payment_reference, generate_ticket_number, generate_withdrawal_reference,
};
pub use jwt::*;
