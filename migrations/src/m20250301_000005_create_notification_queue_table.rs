use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationQueue::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationQueue::RecipientEmail)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationQueue::EventType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(NotificationQueue::Variables).json().not_null())
                    .col(
                        ColumnDef::new(NotificationQueue::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(NotificationQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum NotificationQueue {
    Table,
    Id,
    RecipientEmail,
    EventType,
    Variables,
    Status,
    CreatedAt,
}
