use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FundingPool::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FundingPool::Id)
                            .string_len(64)
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FundingPool::Balance)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(FundingPool::Committed)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(FundingPool::InFlight)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(FundingPool::BalanceRefreshedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FundingPool::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FundingPool::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FundingReservations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FundingReservations::OrderId)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FundingReservations::PoolId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FundingReservations::Amount)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FundingReservations::State)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FundingReservations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FundingReservations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_funding_reservations_pool")
                            .from(FundingReservations::Table, FundingReservations::PoolId)
                            .to(FundingPool::Table, FundingPool::Id),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FundingReservations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FundingPool::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FundingPool {
    Table,
    Id,
    Balance,
    Committed,
    InFlight,
    BalanceRefreshedAt,
    UpdatedAt,
    Version,
}

#[derive(DeriveIden)]
enum FundingReservations {
    Table,
    OrderId,
    PoolId,
    Amount,
    State,
    CreatedAt,
    UpdatedAt,
}
