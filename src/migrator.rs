use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_master_data_tables::Migration),
            Box::new(m20240101_000002_create_ledger_tables::Migration),
            Box::new(m20240101_000003_create_lot_tables::Migration),
            Box::new(m20240101_000004_create_cycle_count_tables::Migration),
        ]
    }
}

mod m20240101_000001_create_master_data_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_master_data_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // matches entities/item_master.rs
            manager
                .create_table(
                    Table::create()
                        .table(ItemMasters::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(ItemMasters::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(ItemMasters::TenantId).uuid().not_null())
                        .col(ColumnDef::new(ItemMasters::Sku).string().not_null())
                        .col(ColumnDef::new(ItemMasters::Description).string().null())
                        .col(ColumnDef::new(ItemMasters::BaseUom).string_len(16).not_null())
                        .col(
                            ColumnDef::new(ItemMasters::LotTracked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ItemMasters::SerialTracked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ItemMasters::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ItemMasters::UpdatedAt)
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
                        .name("idx_item_masters_tenant_sku")
                        .table(ItemMasters::Table)
                        .col(ItemMasters::TenantId)
                        .col(ItemMasters::Sku)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // matches entities/uom_conversion.rs
            manager
                .create_table(
                    Table::create()
                        .table(UomConversions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UomConversions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UomConversions::TenantId).uuid().not_null())
                        .col(ColumnDef::new(UomConversions::ItemId).uuid().null())
                        .col(
                            ColumnDef::new(UomConversions::FromUom)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(UomConversions::ToUom).string_len(16).not_null())
                        .col(
                            ColumnDef::new(UomConversions::Factor)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UomConversions::CreatedAt)
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
                        .name("idx_uom_conversions_tenant_item")
                        .table(UomConversions::Table)
                        .col(UomConversions::TenantId)
                        .col(UomConversions::ItemId)
                        .to_owned(),
                )
                .await?;

            // matches entities/inventory_location.rs
            manager
                .create_table(
                    Table::create()
                        .table(InventoryLocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryLocations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryLocations::TenantId).uuid().not_null())
                        .col(ColumnDef::new(InventoryLocations::SiteId).uuid().not_null())
                        .col(ColumnDef::new(InventoryLocations::Code).string().not_null())
                        .col(ColumnDef::new(InventoryLocations::Name).string().null())
                        .col(
                            ColumnDef::new(InventoryLocations::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(InventoryLocations::CreatedAt)
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
                        .name("idx_inventory_locations_tenant_site")
                        .table(InventoryLocations::Table)
                        .col(InventoryLocations::TenantId)
                        .col(InventoryLocations::SiteId)
                        .to_owned(),
                )
                .await?;

            // matches entities/reason_code.rs
            manager
                .create_table(
                    Table::create()
                        .table(ReasonCodes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(ReasonCodes::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(ReasonCodes::TenantId).uuid().not_null())
                        .col(ColumnDef::new(ReasonCodes::Code).string_len(32).not_null())
                        .col(ColumnDef::new(ReasonCodes::Description).string().not_null())
                        .col(
                            ColumnDef::new(ReasonCodes::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(ReasonCodes::CreatedAt)
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
                        .name("idx_reason_codes_tenant_code")
                        .table(ReasonCodes::Table)
                        .col(ReasonCodes::TenantId)
                        .col(ReasonCodes::Code)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReasonCodes::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryLocations::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(UomConversions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ItemMasters::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ItemMasters {
        Table,
        Id,
        TenantId,
        Sku,
        Description,
        BaseUom,
        LotTracked,
        SerialTracked,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum UomConversions {
        Table,
        Id,
        TenantId,
        ItemId,
        FromUom,
        ToUom,
        Factor,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryLocations {
        Table,
        Id,
        TenantId,
        SiteId,
        Code,
        Name,
        Active,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum ReasonCodes {
        Table,
        Id,
        TenantId,
        Code,
        Description,
        Active,
        CreatedAt,
    }
}

mod m20240101_000002_create_ledger_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_ledger_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // matches entities/inventory_balance.rs
            manager
                .create_table(
                    Table::create()
                        .table(InventoryBalances::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryBalances::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryBalances::TenantId).uuid().not_null())
                        .col(ColumnDef::new(InventoryBalances::SiteId).uuid().not_null())
                        .col(ColumnDef::new(InventoryBalances::ItemId).uuid().not_null())
                        .col(ColumnDef::new(InventoryBalances::LocationId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryBalances::QtyBase)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBalances::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(InventoryBalances::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBalances::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // one balance row per (tenant, item, location); a racing insert fails here
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_balances_tenant_item_location")
                        .table(InventoryBalances::Table)
                        .col(InventoryBalances::TenantId)
                        .col(InventoryBalances::ItemId)
                        .col(InventoryBalances::LocationId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_balances_tenant_site_item")
                        .table(InventoryBalances::Table)
                        .col(InventoryBalances::TenantId)
                        .col(InventoryBalances::SiteId)
                        .col(InventoryBalances::ItemId)
                        .to_owned(),
                )
                .await?;

            // matches entities/inventory_event.rs
            manager
                .create_table(
                    Table::create()
                        .table(InventoryEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryEvents::TenantId).uuid().not_null())
                        .col(ColumnDef::new(InventoryEvents::SiteId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryEvents::EventType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryEvents::ItemId).uuid().not_null())
                        .col(ColumnDef::new(InventoryEvents::FromLocationId).uuid().null())
                        .col(ColumnDef::new(InventoryEvents::ToLocationId).uuid().null())
                        .col(ColumnDef::new(InventoryEvents::LotId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryEvents::QtyEntered)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryEvents::UomEntered)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryEvents::QtyBase)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryEvents::ReferenceType).string().null())
                        .col(ColumnDef::new(InventoryEvents::ReferenceId).string().null())
                        .col(ColumnDef::new(InventoryEvents::ReasonCodeId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryEvents::CreatedByUserId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryEvents::WorkcellId).string().null())
                        .col(ColumnDef::new(InventoryEvents::DeviceId).string().null())
                        .col(ColumnDef::new(InventoryEvents::Notes).string().null())
                        .col(
                            ColumnDef::new(InventoryEvents::CreatedAt)
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
                        .name("idx_inventory_events_tenant_item_created")
                        .table(InventoryEvents::Table)
                        .col(InventoryEvents::TenantId)
                        .col(InventoryEvents::ItemId)
                        .col(InventoryEvents::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_events_reference")
                        .table(InventoryEvents::Table)
                        .col(InventoryEvents::TenantId)
                        .col(InventoryEvents::ReferenceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryEvents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryBalances::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryBalances {
        Table,
        Id,
        TenantId,
        SiteId,
        ItemId,
        LocationId,
        QtyBase,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryEvents {
        Table,
        Id,
        TenantId,
        SiteId,
        EventType,
        ItemId,
        FromLocationId,
        ToLocationId,
        LotId,
        QtyEntered,
        UomEntered,
        QtyBase,
        ReferenceType,
        ReferenceId,
        ReasonCodeId,
        CreatedByUserId,
        WorkcellId,
        DeviceId,
        Notes,
        CreatedAt,
    }
}

mod m20240101_000003_create_lot_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_lot_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // matches entities/inventory_lot.rs
            manager
                .create_table(
                    Table::create()
                        .table(InventoryLots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(InventoryLots::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(InventoryLots::TenantId).uuid().not_null())
                        .col(ColumnDef::new(InventoryLots::ItemId).uuid().not_null())
                        .col(ColumnDef::new(InventoryLots::LotNumber).string().not_null())
                        .col(ColumnDef::new(InventoryLots::LocationId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryLots::QtyProduced)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::QtyAvailable)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InventoryLots::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(InventoryLots::QcStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryLots::ExpirationDate).date().null())
                        .col(ColumnDef::new(InventoryLots::ManufacturingDate).date().null())
                        .col(ColumnDef::new(InventoryLots::SupplierId).uuid().null())
                        .col(ColumnDef::new(InventoryLots::QuarantineReason).string().null())
                        .col(
                            ColumnDef::new(InventoryLots::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryLots::UpdatedAt)
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
                        .name("idx_inventory_lots_tenant_item_number")
                        .table(InventoryLots::Table)
                        .col(InventoryLots::TenantId)
                        .col(InventoryLots::ItemId)
                        .col(InventoryLots::LotNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // matches entities/lot_history.rs
            manager
                .create_table(
                    Table::create()
                        .table(LotHistories::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(LotHistories::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(LotHistories::TenantId).uuid().not_null())
                        .col(ColumnDef::new(LotHistories::LotId).uuid().not_null())
                        .col(
                            ColumnDef::new(LotHistories::EventType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LotHistories::QtyBefore)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LotHistories::QtyAfter)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LotHistories::QtyChanged)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LotHistories::Detail).string().null())
                        .col(ColumnDef::new(LotHistories::InventoryEventId).uuid().null())
                        .col(ColumnDef::new(LotHistories::CreatedByUserId).uuid().not_null())
                        .col(
                            ColumnDef::new(LotHistories::CreatedAt)
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
                        .name("idx_lot_histories_lot")
                        .table(LotHistories::Table)
                        .col(LotHistories::LotId)
                        .col(LotHistories::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LotHistories::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryLots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryLots {
        Table,
        Id,
        TenantId,
        ItemId,
        LotNumber,
        LocationId,
        QtyProduced,
        QtyAvailable,
        Status,
        QcStatus,
        ExpirationDate,
        ManufacturingDate,
        SupplierId,
        QuarantineReason,
        ReceivedAt,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum LotHistories {
        Table,
        Id,
        TenantId,
        LotId,
        EventType,
        QtyBefore,
        QtyAfter,
        QtyChanged,
        Detail,
        InventoryEventId,
        CreatedByUserId,
        CreatedAt,
    }
}

mod m20240101_000004_create_cycle_count_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_cycle_count_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // matches entities/cycle_count.rs
            manager
                .create_table(
                    Table::create()
                        .table(CycleCounts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CycleCounts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CycleCounts::TenantId).uuid().not_null())
                        .col(ColumnDef::new(CycleCounts::SiteId).uuid().not_null())
                        .col(ColumnDef::new(CycleCounts::Status).string_len(32).not_null())
                        .col(ColumnDef::new(CycleCounts::ReasonCodeId).uuid().null())
                        .col(ColumnDef::new(CycleCounts::Notes).string().null())
                        .col(ColumnDef::new(CycleCounts::CreatedByUserId).uuid().not_null())
                        .col(
                            ColumnDef::new(CycleCounts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CycleCounts::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CycleCounts::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            // matches entities/cycle_count_line.rs
            manager
                .create_table(
                    Table::create()
                        .table(CycleCountLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CycleCountLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CycleCountLines::CycleCountId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CycleCountLines::TenantId).uuid().not_null())
                        .col(ColumnDef::new(CycleCountLines::ItemId).uuid().not_null())
                        .col(ColumnDef::new(CycleCountLines::LocationId).uuid().not_null())
                        .col(
                            ColumnDef::new(CycleCountLines::ExpectedQtyBase)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CycleCountLines::CountedQtyBase)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CycleCountLines::VarianceQtyBase)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CycleCountLines::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(CycleCountLines::CountedByUserId).uuid().null())
                        .col(
                            ColumnDef::new(CycleCountLines::CountedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(CycleCountLines::PostedEventId).uuid().null())
                        .col(
                            ColumnDef::new(CycleCountLines::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(CycleCountLines::CreatedAt)
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
                        .name("idx_cycle_count_lines_count")
                        .table(CycleCountLines::Table)
                        .col(CycleCountLines::CycleCountId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CycleCountLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CycleCounts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CycleCounts {
        Table,
        Id,
        TenantId,
        SiteId,
        Status,
        ReasonCodeId,
        Notes,
        CreatedByUserId,
        CreatedAt,
        CompletedAt,
        Version,
    }

    #[derive(DeriveIden)]
    enum CycleCountLines {
        Table,
        Id,
        CycleCountId,
        TenantId,
        ItemId,
        LocationId,
        ExpectedQtyBase,
        CountedQtyBase,
        VarianceQtyBase,
        Status,
        CountedByUserId,
        CountedAt,
        PostedEventId,
        Version,
        CreatedAt,
    }
}
