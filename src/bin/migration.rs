use clap::{Parser, Subcommand};
use sea_orm::DbErr;
use sea_orm_migration::MigratorTrait;
use tracing::info;

use syncdata_api::{
    config,
    db::{self, DbConfig},
    migrator::Migrator,
};

#[derive(Parser)]
#[command(name = "migration", about = "Manage the syncdata table schema", version)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", help = "Overrides the configured database url")]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Apply pending migrations (default)
    Up,
    /// Roll back the last applied migration
    Down,
    /// Print applied and pending migrations
    Status,
    /// Drop every table and re-apply all migrations
    Fresh,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let mut db_config = DbConfig::from(&cfg);
    if let Some(url) = cli.database_url {
        db_config.url = url;
    }

    info!("Connecting to database");
    let db = db::establish_connection_with_config(&db_config).await?;

    let command = cli.command.unwrap_or(Command::Up);
    let result: Result<(), DbErr> = match command {
        Command::Up => Migrator::up(&db, None).await,
        Command::Down => Migrator::down(&db, Some(1)).await,
        Command::Status => Migrator::status(&db).await,
        Command::Fresh => Migrator::fresh(&db).await,
    };
    result?;

    info!("Migration command completed successfully");
    db::close_pool(db).await?;
    Ok(())
}
