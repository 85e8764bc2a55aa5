use sea_orm_migration::prelude::*;

/// One row per organizer.
/// available + pending + withdrawn <= total_earned, the gap is withdrawal fees
#[derive(DeriveIden)]
enum OrganizerBalances {
    Table,
    Id,
    OrganizerId,
    TotalEarned,
    AvailableBalance,
    PendingBalance,
    WithdrawnAmount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WithdrawalRequests {
    Table,
    Id,
    OrganizerId,
    Amount,
    Fee,
    NetAmount,
    Status,
    BankName,
    AccountNumber,
    AccountName,
    ReviewedBy,
    ReviewedAt,
    ReviewComment,
    ProcessedAt,
    TransactionRef,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OrganizerBalances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrganizerBalances::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OrganizerBalances::OrganizerId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OrganizerBalances::TotalEarned)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OrganizerBalances::AvailableBalance)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OrganizerBalances::PendingBalance)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OrganizerBalances::WithdrawnAmount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OrganizerBalances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OrganizerBalances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_organizer_balances_user")
                            .from(OrganizerBalances::Table, OrganizerBalances::OrganizerId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // lazy creation relies on this for insert-if-absent
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_organizer_balances_organizer_unique")
                    .table(OrganizerBalances::Table)
                    .col(OrganizerBalances::OrganizerId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WithdrawalRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WithdrawalRequests::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::OrganizerId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::Amount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WithdrawalRequests::Fee).big_integer().not_null())
                    .col(
                        ColumnDef::new(WithdrawalRequests::NetAmount)
                            .big_integer()
                            .not_null(),
                    )
                    // pending / approved / rejected / processed
                    .col(
                        ColumnDef::new(WithdrawalRequests::Status)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::BankName)
                            .string_len(120)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::AccountNumber)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::AccountName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::ReviewedBy)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::ReviewedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(WithdrawalRequests::ReviewComment).text().null())
                    .col(
                        ColumnDef::new(WithdrawalRequests::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::TransactionRef)
                            .string_len(128)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WithdrawalRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_withdrawal_requests_organizer")
                            .from(WithdrawalRequests::Table, WithdrawalRequests::OrganizerId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_withdrawal_requests_organizer")
                    .table(WithdrawalRequests::Table)
                    .col(WithdrawalRequests::OrganizerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_withdrawal_requests_status")
                    .table(WithdrawalRequests::Table)
                    .col(WithdrawalRequests::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(WithdrawalRequests::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(OrganizerBalances::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
