use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20240601_000001_create_sync_tables::Migration)]
    }
}

mod m20240601_000001_create_sync_tables {

    use crate::entities::registry;
    use sea_orm_migration::prelude::*;
    use tracing::info;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_sync_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One table per registry entry, DDL derived from its field list
            let backend = manager.get_database_backend();
            for schema in registry() {
                manager
                    .create_table(schema.create_table_statement(backend))
                    .await?;
                info!(table = schema.table_name, "ensured sync table");
            }
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            for schema in registry().iter().rev() {
                manager
                    .drop_table(
                        Table::drop()
                            .table(Alias::new(schema.table_name))
                            .if_exists()
                            .to_owned(),
                    )
                    .await?;
            }
            Ok(())
        }
    }
}
