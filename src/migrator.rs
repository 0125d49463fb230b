use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_users_table::Migration),
            Box::new(m20240301_000002_create_stock_tiers_table::Migration),
            Box::new(m20240301_000003_create_coupons_table::Migration),
            Box::new(m20240301_000004_create_robux_transactions_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_users_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Users::RobloxUserId)
                                .big_integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::RobloxUsername).string().not_null())
                        .col(ColumnDef::new(Users::WhatsappNumber).string().null())
                        .col(ColumnDef::new(Users::Email).string().null())
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Users {
        Table,
        Id,
        RobloxUserId,
        RobloxUsername,
        WhatsappNumber,
        Email,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_stock_tiers_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_stock_tiers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockTiers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockTiers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        // One canonical tier per amount
                        .col(
                            ColumnDef::new(StockTiers::Amount)
                                .big_integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(StockTiers::Price).decimal().not_null())
                        .col(
                            ColumnDef::new(StockTiers::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(StockTiers::AllowOrders)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(StockTiers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTiers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockTiers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockTiers {
        Table,
        Id,
        Amount,
        Price,
        IsActive,
        AllowOrders,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_coupons_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_coupons_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        // Stored uppercase; lookups normalize the input
                        .col(
                            ColumnDef::new(Coupons::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Coupons::CouponType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Coupons::Value).decimal().not_null())
                        .col(
                            ColumnDef::new(Coupons::MaxUses)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::CurrentUses)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Code,
        CouponType,
        Value,
        MaxUses,
        CurrentUses,
        IsActive,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_robux_transactions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_robux_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RobuxTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RobuxTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RobuxTransactions::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(RobuxTransactions::RobuxAmount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::TotalPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::FinalPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::Method)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(RobuxTransactions::CouponCode).string().null())
                        .col(
                            ColumnDef::new(RobuxTransactions::Discount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::MerchantRef)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::PaymentReference)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::CheckoutUrl)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::GamepassId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::GamepassUrl)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::CredentialCiphertext)
                                .text()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::BackupCodesCiphertext)
                                .text()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::FailureReason)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RobuxTransactions::Version)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_robux_transactions_user")
                                .from(RobuxTransactions::Table, RobuxTransactions::UserId)
                                .to(Users::Table, Users::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // Reconciliation looks transactions up by merchant reference
            manager
                .create_index(
                    Index::create()
                        .name("idx_robux_transactions_merchant_ref")
                        .table(RobuxTransactions::Table)
                        .col(RobuxTransactions::MerchantRef)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_robux_transactions_status")
                        .table(RobuxTransactions::Table)
                        .col(RobuxTransactions::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RobuxTransactions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Users {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum RobuxTransactions {
        Table,
        Id,
        UserId,
        RobuxAmount,
        TotalPrice,
        FinalPrice,
        Method,
        Status,
        CouponCode,
        Discount,
        MerchantRef,
        PaymentReference,
        CheckoutUrl,
        GamepassId,
        GamepassUrl,
        CredentialCiphertext,
        BackupCodesCiphertext,
        FailureReason,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}
