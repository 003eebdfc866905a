//! Database connection manager
//!
//! Opens the SQLite pool and creates the session, stats and history tables.

use std::str::FromStr;

use sqlx::query;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::AppResult;

/// Database connection manager
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    pub pool: SqlitePool,
}

impl DatabaseManager {
    /// Connect to the given `sqlite:` URL, creating the file if needed
    pub async fn new(database_url: &str) -> AppResult<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        debug!("Successfully connected to SQLite database");
        Ok(Self { pool })
    }

    /// Private in-memory database living as long as the manager
    pub async fn in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> AppResult<()> {
        info!("Running database migrations");
        self.create_tables().await?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    async fn create_tables(&self) -> AppResult<()> {
        // Active sessions table
        query(
            r#"
            CREATE TABLE IF NOT EXISTS active_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                task_id TEXT,
                task_title TEXT,
                status TEXT NOT NULL CHECK (status IN ('stopped', 'running', 'paused', 'terminated')),
                phase TEXT NOT NULL CHECK (phase IN ('work', 'short_break', 'long_break')),
                work_duration INTEGER NOT NULL DEFAULT 25,
                short_break_duration INTEGER NOT NULL DEFAULT 5,
                long_break_duration INTEGER NOT NULL DEFAULT 15,
                sessions_until_long_break INTEGER NOT NULL DEFAULT 4,
                completed_work_sessions INTEGER NOT NULL DEFAULT 0,
                completed_break_sessions INTEGER NOT NULL DEFAULT 0,
                start_time INTEGER,
                pause_time INTEGER,
                time_remaining_seconds INTEGER NOT NULL CHECK (time_remaining_seconds >= 0),
                interval_duration INTEGER,
                show_floating_indicator BOOLEAN NOT NULL DEFAULT TRUE,
                show_card BOOLEAN NOT NULL DEFAULT TRUE,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_active_sessions_user_status
            ON active_sessions (user_id, status, updated_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Cumulative per-task counters
        query(
            r#"
            CREATE TABLE IF NOT EXISTS task_pomodoro_stats (
                task_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                work_sessions_count INTEGER NOT NULL DEFAULT 0,
                work_duration_total_minutes INTEGER NOT NULL DEFAULT 0,
                break_sessions_count INTEGER NOT NULL DEFAULT 0,
                break_duration_total_minutes INTEGER NOT NULL DEFAULT 0,
                last_work_session_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (task_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Append-only interval history
        query(
            r#"
            CREATE TABLE IF NOT EXISTS pomodoro_history (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                task_id TEXT,
                duration_minutes INTEGER NOT NULL,
                session_type TEXT NOT NULL,
                interrupted BOOLEAN NOT NULL DEFAULT FALSE,
                completed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite tables created successfully");
        Ok(())
    }

    /// Get connection pool statistics
    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }

    /// Test database connection
    pub async fn test_connection(&self) -> AppResult<()> {
        query("SELECT 1").fetch_one(&self.pool).await?;
        debug!("Database connection test successful");
        Ok(())
    }
}
