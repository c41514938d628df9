use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000002_create_order_notes_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OrderNotes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderNotes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OrderNotes::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderNotes::Kind).string_len(32).not_null())
                    .col(ColumnDef::new(OrderNotes::Note).text().not_null())
                    .col(ColumnDef::new(OrderNotes::Details).json().null())
                    .col(ColumnDef::new(OrderNotes::CreatedBy).string().null())
                    .col(
                        ColumnDef::new(OrderNotes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_order_notes_order_id")
                    .table(OrderNotes::Table)
                    .col(OrderNotes::OrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderNotes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OrderNotes {
    Table,
    Id,
    OrderId,
    Kind,
    Note,
    Details,
    CreatedBy,
    CreatedAt,
}
