use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::error::{NodeError, Result};

/// Database service for managing the SeaORM connection and migrations
#[derive(Debug, Clone)]
pub struct DatabaseService {
    pub url: String,
    pub connection: DatabaseConnection,
}

impl DatabaseService {
    /// Create a new database service with automatic migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::new_with_options(database_url, 100, 5).await
    }

    /// Create a new database service with custom connection options
    pub async fn new_with_options(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        let mut opt = ConnectOptions::new(database_url.to_owned());

        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let connection = Database::connect(opt).await.map_err(|e| NodeError::Database {
            message: format!("Failed to connect to database: {e}"),
            source: Some(Box::new(e)),
        })?;

        Ok(DatabaseService {
            url: database_url.to_owned(),
            connection,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run migrations manually
    pub async fn migrate(&self) -> Result<()> {
        Migrator::up(&self.connection, None)
            .await
            .map_err(|e| NodeError::Database {
                message: format!("Failed to run migrations: {e}"),
                source: Some(Box::new(e)),
            })?;

        tracing::info!("Migrations completed successfully");
        Ok(())
    }

    /// Health check for database connection
    pub async fn health_check(&self) -> Result<bool> {
        self.connection.ping().await.map_err(|e| NodeError::Database {
            message: format!("Failed to ping database: {e}"),
            source: Some(Box::new(e)),
        })?;

        Ok(true)
    }
}
