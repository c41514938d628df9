use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                    .col(
                        ColumnDef::new(Orders::OrderNumber)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Orders::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending_payment"),
                    )
                    .col(
                        ColumnDef::new(Orders::PaymentStatus)
                            .string_len(32)
                            .not_null()
                            .default("unpaid"),
                    )
                    .col(
                        ColumnDef::new(Orders::FundingStatus)
                            .string_len(32)
                            .not_null()
                            .default("none"),
                    )
                    .col(
                        ColumnDef::new(Orders::TotalAmount)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Orders::Currency)
                            .string_len(3)
                            .not_null()
                            .default("USD"),
                    )
                    .col(ColumnDef::new(Orders::LineItems).json().not_null())
                    .col(ColumnDef::new(Orders::ShippingAddress).json().null())
                    .col(
                        ColumnDef::new(Orders::IsGift)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Orders::GiftMessage).text().null())
                    .col(ColumnDef::new(Orders::VendorRequestId).string().null())
                    .col(ColumnDef::new(Orders::VendorOrderId).string().null())
                    .col(ColumnDef::new(Orders::VendorError).json().null())
                    .col(ColumnDef::new(Orders::LastError).text().null())
                    .col(ColumnDef::new(Orders::FundingHoldReason).text().null())
                    .col(
                        ColumnDef::new(Orders::ExpectedFundingDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::ScheduledDeliveryDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Orders::WebhookToken).string().null())
                    .col(ColumnDef::new(Orders::TrackingNumbers).json().null())
                    .col(
                        ColumnDef::new(Orders::ProcessingStartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::SubmittedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .to_owned(),
            )
            .await?;

        // One vendor request can only ever belong to one order.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_orders_vendor_request_id")
                    .table(Orders::Table)
                    .col(Orders::VendorRequestId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_orders_status_expected_funding")
                    .table(Orders::Table)
                    .col(Orders::Status)
                    .col(Orders::ExpectedFundingDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_orders_user_id")
                    .table(Orders::Table)
                    .col(Orders::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    OrderNumber,
    UserId,
    Status,
    PaymentStatus,
    FundingStatus,
    TotalAmount,
    Currency,
    LineItems,
    ShippingAddress,
    IsGift,
    GiftMessage,
    VendorRequestId,
    VendorOrderId,
    VendorError,
    LastError,
    FundingHoldReason,
    ExpectedFundingDate,
    ScheduledDeliveryDate,
    WebhookToken,
    TrackingNumbers,
    ProcessingStartedAt,
    SubmittedAt,
    CreatedAt,
    UpdatedAt,
    Version,
}
