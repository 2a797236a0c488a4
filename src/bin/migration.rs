use cylinder_fleet_api::migrator;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting database migration");

    // Configure database connection
    let database_url =
        std::env::var("APP__DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());

    info!("Connecting to database: {}", database_url);
    migrator::run_migration(&database_url).await?;

    info!("Migration completed successfully");

    Ok(())
}
