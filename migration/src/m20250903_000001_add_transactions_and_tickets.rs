use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Transactions {
    Table,
    Id,
    UserId,
    EventId,
    TransactionType,
    Status,
    Amount,
    PlatformFee,
    NetAmount,
    Currency,
    PaymentGateway,
    PaymentReference,
    PaymentMetadata,
    AuthorizationUrl,
    RefundDue,
    FailureReason,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tickets {
    Table,
    Id,
    TicketNumber,
    TransactionId,
    EventId,
    TicketTypeId,
    AttendeeId,
    Status,
    Price,
    QrCodeUrl,
    PdfUrl,
    CheckedInAt,
    CheckedInBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum TicketTypes {
    Table,
    Id,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

/// amount / platform_fee / net_amount are minor units, net_amount = amount - platform_fee.
/// payment_reference is the idempotency key for settlement.
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Transactions::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Transactions::EventId).big_integer().null())
                    // purchase / refund / withdrawal
                    .col(
                        ColumnDef::new(Transactions::TransactionType)
                            .string_len(20)
                            .not_null(),
                    )
                    // pending / completed / failed / refunded
                    .col(ColumnDef::new(Transactions::Status).string_len(20).not_null())
                    .col(ColumnDef::new(Transactions::Amount).big_integer().not_null())
                    .col(
                        ColumnDef::new(Transactions::PlatformFee)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Transactions::NetAmount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::Currency).string_len(8).not_null())
                    .col(
                        ColumnDef::new(Transactions::PaymentGateway)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::PaymentReference)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::PaymentMetadata).json_binary().null())
                    .col(ColumnDef::new(Transactions::AuthorizationUrl).text().null())
                    .col(
                        ColumnDef::new(Transactions::RefundDue)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Transactions::FailureReason).text().null())
                    .col(
                        ColumnDef::new(Transactions::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Transactions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transactions_user")
                            .from(Transactions::Table, Transactions::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_transactions_reference_unique")
                    .table(Transactions::Table)
                    .col(Transactions::PaymentReference)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_transactions_user_created")
                    .table(Transactions::Table)
                    .col(Transactions::UserId)
                    .col(Transactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // expiry sweep scans pending rows by age
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_transactions_status_created")
                    .table(Transactions::Table)
                    .col(Transactions::Status)
                    .col(Transactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Tickets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tickets::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tickets::TicketNumber).string_len(32).not_null())
                    .col(ColumnDef::new(Tickets::TransactionId).big_integer().not_null())
                    .col(ColumnDef::new(Tickets::EventId).big_integer().not_null())
                    .col(ColumnDef::new(Tickets::TicketTypeId).big_integer().not_null())
                    .col(ColumnDef::new(Tickets::AttendeeId).big_integer().not_null())
                    // pending / confirmed / cancelled / used
                    .col(ColumnDef::new(Tickets::Status).string_len(20).not_null())
                    .col(ColumnDef::new(Tickets::Price).big_integer().not_null())
                    .col(ColumnDef::new(Tickets::QrCodeUrl).text().null())
                    .col(ColumnDef::new(Tickets::PdfUrl).text().null())
                    .col(
                        ColumnDef::new(Tickets::CheckedInAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Tickets::CheckedInBy).big_integer().null())
                    .col(
                        ColumnDef::new(Tickets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Tickets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tickets_transaction")
                            .from(Tickets::Table, Tickets::TransactionId)
                            .to(Transactions::Table, Transactions::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tickets_event")
                            .from(Tickets::Table, Tickets::EventId)
                            .to(Events::Table, Events::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tickets_ticket_type")
                            .from(Tickets::Table, Tickets::TicketTypeId)
                            .to(TicketTypes::Table, TicketTypes::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tickets_number_unique")
                    .table(Tickets::Table)
                    .col(Tickets::TicketNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tickets_transaction")
                    .table(Tickets::Table)
                    .col(Tickets::TransactionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tickets_attendee")
                    .table(Tickets::Table)
                    .col(Tickets::AttendeeId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tickets_event")
                    .table(Tickets::Table)
                    .col(Tickets::EventId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tickets::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transactions::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}
