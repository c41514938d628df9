pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_orders_table;
mod m20250301_000002_create_order_notes_table;
mod m20250301_000003_create_funding_ledger_tables;
mod m20250301_000004_create_customer_tables;
mod m20250301_000005_create_notification_queue_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_orders_table::Migration),
            Box::new(m20250301_000002_create_order_notes_table::Migration),
            Box::new(m20250301_000003_create_funding_ledger_tables::Migration),
            Box::new(m20250301_000004_create_customer_tables::Migration),
            Box::new(m20250301_000005_create_notification_queue_table::Migration),
        ]
    }
}
