use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_pages_table::Migration),
            Box::new(m20240101_000002_add_pages_payment_id_unique::Migration),
        ]
    }
}

mod m20240101_000001_create_pages_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_pages_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Matches models/page.rs Model
            manager
                .create_table(
                    Table::create()
                        .table(Pages::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Pages::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Pages::Title).string_len(120).not_null())
                        .col(ColumnDef::new(Pages::Message).text().not_null())
                        .col(ColumnDef::new(Pages::StartDate).date().not_null())
                        .col(
                            ColumnDef::new(Pages::DateDisplay)
                                .string_len(16)
                                .not_null()
                                .default("default"),
                        )
                        .col(
                            ColumnDef::new(Pages::Animation)
                                .string_len(32)
                                .not_null()
                                .default("none"),
                        )
                        .col(ColumnDef::new(Pages::Photos).json().not_null())
                        .col(ColumnDef::new(Pages::Music).json().null())
                        .col(
                            ColumnDef::new(Pages::Status)
                                .string_len(16)
                                .not_null()
                                .default("draft"),
                        )
                        .col(ColumnDef::new(Pages::PaymentId).string().null())
                        .col(ColumnDef::new(Pages::UserEmail).string().null())
                        .col(ColumnDef::new(Pages::PlanType).string_len(16).null())
                        .col(
                            ColumnDef::new(Pages::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Pages::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Pages::PublishedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_pages_status")
                        .table(Pages::Table)
                        .col(Pages::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Pages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Pages {
        Table,
        Id,
        Title,
        Message,
        StartDate,
        DateDisplay,
        Animation,
        Photos,
        Music,
        Status,
        PaymentId,
        UserEmail,
        PlanType,
        CreatedAt,
        UpdatedAt,
        PublishedAt,
    }
}

mod m20240101_000002_add_pages_payment_id_unique {
    use super::m20240101_000001_create_pages_table::Pages;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_add_pages_payment_id_unique"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Check-and-claim for publication: one page per provider payment
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_pages_payment_id")
                        .table(Pages::Table)
                        .col(Pages::PaymentId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_index(
                    Index::drop()
                        .name("uq_pages_payment_id")
                        .table(Pages::Table)
                        .to_owned(),
                )
                .await
        }
    }
}

// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(4)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
