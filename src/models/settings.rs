use crate::entities::platform_settings_entity as ps;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Values the money path reads at the start of each fee computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSettings {
    pub platform_fee_bp: i32,
    pub withdrawal_fee_bp: i32,
    pub min_withdrawal_amount: i64,
    pub currency: String,
}

impl From<ps::Model> for PlatformSettings {
    fn from(m: ps::Model) -> Self {
        Self {
            platform_fee_bp: m.platform_fee_bp,
            withdrawal_fee_bp: m.withdrawal_fee_bp,
            min_withdrawal_amount: m.min_withdrawal_amount,
            currency: m.currency,
        }
    }
}

pub fn bp_to_percent(bp: i32) -> f64 {
    f64::from(bp) / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettingsResponse {
    pub platform_fee_percent: f64,
    pub withdrawal_fee_percent: f64,
    pub min_withdrawal_amount: i64,
    pub currency: String,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl From<ps::Model> for SettingsResponse {
    fn from(m: ps::Model) -> Self {
        Self {
            platform_fee_percent: bp_to_percent(m.platform_fee_bp),
            withdrawal_fee_percent: bp_to_percent(m.withdrawal_fee_bp),
            min_withdrawal_amount: m.min_withdrawal_amount,
            currency: m.currency,
            updated_by: m.updated_by,
            updated_at: m.updated_at,
        }
    }
}

/// Partial update, absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateSettingsRequest {
    pub platform_fee_percent: Option<f64>,
    pub withdrawal_fee_percent: Option<f64>,
    pub min_withdrawal_amount: Option<i64>,
    pub currency: Option<String>,
}
