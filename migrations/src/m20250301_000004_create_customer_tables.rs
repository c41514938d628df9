use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CustomerProfiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CustomerProfiles::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CustomerProfiles::DisplayName).string().null())
                    .col(ColumnDef::new(CustomerProfiles::Email).string().null())
                    .col(ColumnDef::new(CustomerProfiles::Phone).string().null())
                    .col(
                        ColumnDef::new(CustomerProfiles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WishlistItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WishlistItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WishlistItems::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(WishlistItems::ProductId).string().not_null())
                    .col(ColumnDef::new(WishlistItems::Title).string().null())
                    .col(
                        ColumnDef::new(WishlistItems::IsPublic)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(WishlistItems::PurchasedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WishlistItems::PurchasedByOrderId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WishlistItems::CreatedAt)
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
                    .name("idx_wishlist_items_product_id")
                    .table(WishlistItems::Table)
                    .col(WishlistItems::ProductId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WishlistItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CustomerProfiles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CustomerProfiles {
    Table,
    Id,
    DisplayName,
    Email,
    Phone,
    CreatedAt,
}

#[derive(DeriveIden)]
enum WishlistItems {
    Table,
    Id,
    OwnerId,
    ProductId,
    Title,
    IsPublic,
    PurchasedAt,
    PurchasedByOrderId,
    CreatedAt,
}
