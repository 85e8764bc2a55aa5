use crate::config::PlatformConfig;
use crate::entities::platform_settings_entity as ps;
use crate::error::{AppError, AppResult};
use crate::models::{PlatformSettings, SettingsResponse, UpdateSettingsRequest};
use crate::services::fee_calculator::percent_to_bp;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{OnConflict, Query};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set,
};

const SETTINGS_ROW_ID: i64 = 1;

/// Source of the platform settings used by fee computations. Passed to the
/// services explicitly so tests can pin the values.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn current(&self) -> AppResult<PlatformSettings>;
}

pub struct FixedSettings(pub PlatformSettings);

#[async_trait]
impl SettingsProvider for FixedSettings {
    async fn current(&self) -> AppResult<PlatformSettings> {
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
pub struct SettingsService {
    pool: DatabaseConnection,
    defaults: PlatformConfig,
}

impl SettingsService {
    pub fn new(pool: DatabaseConnection, defaults: PlatformConfig) -> Self {
        Self { pool, defaults }
    }

    /// Reads the settings row, seeding it from config the first time
    async fn ensure_row(&self) -> AppResult<ps::Model> {
        if let Some(row) = ps::Entity::find_by_id(SETTINGS_ROW_ID).one(&self.pool).await? {
            return Ok(row);
        }

        let now = Utc::now();
        let insert = Query::insert()
            .into_table(ps::Entity)
            .columns([
                ps::Column::Id,
                ps::Column::PlatformFeeBp,
                ps::Column::WithdrawalFeeBp,
                ps::Column::MinWithdrawalAmount,
                ps::Column::Currency,
                ps::Column::CreatedAt,
                ps::Column::UpdatedAt,
            ])
            .values_panic([
                SETTINGS_ROW_ID.into(),
                self.defaults.default_platform_fee_bp.into(),
                self.defaults.default_withdrawal_fee_bp.into(),
                self.defaults.default_min_withdrawal_amount.into(),
                self.defaults.currency.clone().into(),
                now.into(),
                now.into(),
            ])
            .on_conflict(OnConflict::column(ps::Column::Id).do_nothing().to_owned())
            .to_owned();
        let stmt = self.pool.get_database_backend().build(&insert);
        let res = self.pool.execute(stmt).await?;
        if res.rows_affected() > 0 {
            log::info!("Platform settings seeded from configuration");
        }

        ps::Entity::find_by_id(SETTINGS_ROW_ID)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::InternalError("platform settings row missing".to_string()))
    }

    pub async fn get_settings(&self) -> AppResult<SettingsResponse> {
        Ok(self.ensure_row().await?.into())
    }

    pub async fn update_settings(
        &self,
        admin_id: i64,
        req: UpdateSettingsRequest,
    ) -> AppResult<SettingsResponse> {
        // validate everything before touching the row
        let platform_fee_bp = req.platform_fee_percent.map(percent_to_bp).transpose()?;
        let withdrawal_fee_bp = req.withdrawal_fee_percent.map(percent_to_bp).transpose()?;
        if let Some(min) = req.min_withdrawal_amount
            && min < 0
        {
            return Err(AppError::ValidationError(
                "minimum withdrawal amount cannot be negative".to_string(),
            ));
        }
        let currency = match req.currency {
            Some(c) if c.trim().is_empty() => {
                return Err(AppError::ValidationError(
                    "currency cannot be empty".to_string(),
                ));
            }
            Some(c) => Some(c.trim().to_uppercase()),
            None => None,
        };

        let row = self.ensure_row().await?;
        let mut am = row.into_active_model();
        if let Some(bp) = platform_fee_bp {
            am.platform_fee_bp = Set(bp);
        }
        if let Some(bp) = withdrawal_fee_bp {
            am.withdrawal_fee_bp = Set(bp);
        }
        if let Some(min) = req.min_withdrawal_amount {
            am.min_withdrawal_amount = Set(min);
        }
        if let Some(c) = currency {
            am.currency = Set(c);
        }
        am.updated_by = Set(Some(admin_id));
        am.updated_at = Set(Utc::now());
        let updated = am.update(&self.pool).await?;

        log::info!(
            "Platform settings updated by admin {admin_id}: platform_fee_bp={}, withdrawal_fee_bp={}, min_withdrawal={}, currency={}",
            updated.platform_fee_bp,
            updated.withdrawal_fee_bp,
            updated.min_withdrawal_amount,
            updated.currency
        );
        Ok(updated.into())
    }
}

#[async_trait]
impl SettingsProvider for SettingsService {
    async fn current(&self) -> AppResult<PlatformSettings> {
        Ok(self.ensure_row().await?.into())
    }
}
