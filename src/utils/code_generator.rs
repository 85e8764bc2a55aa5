use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

/// Alphabet for human-read ticket numbers, no 0/O/1/I
const TICKET_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const TICKET_CODE_LEN: usize = 10;

fn short_uuid(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

/// Payment reference handed to the gateway, `TXN-{12 hex}-{unix seconds}`
pub fn generate_payment_reference() -> String {
    format!("TXN-{}-{}", short_uuid(12), Utc::now().timestamp())
}

/// Reference of the ledger record written when a payout is processed
pub fn generate_withdrawal_reference(withdrawal_id: i64) -> String {
    format!("WDR-{withdrawal_id}-{}", short_uuid(8))
}

pub fn generate_ticket_number() -> String {
    let mut rng = rand::thread_rng();
    let code: String = (0..TICKET_CODE_LEN)
        .map(|_| TICKET_ALPHABET[rng.gen_range(0..TICKET_ALPHABET.len())] as char)
        .collect();
    format!("TKT-{code}")
}
