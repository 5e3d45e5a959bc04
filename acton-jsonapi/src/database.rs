//! Database connection pool management

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{sanitize_url, Result, StorageError};

/// Create a PostgreSQL connection pool, retrying with exponential backoff
///
/// Retries up to `max_retries` times, waiting `retry_delay_secs` before the
/// first retry and doubling the wait each time.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                tracing::info!(
                    attempts = attempt + 1,
                    max_connections = config.max_connections,
                    min_connections = config.min_connections,
                    "Database connection pool created"
                );
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries || !e.is_retriable() {
                    tracing::error!(
                        url = %sanitize_url(&config.url),
                        attempts = attempt,
                        "Failed to connect to database: {}",
                        e
                    );
                    return Err(e.into());
                }

                let delay = retry_delay(base_delay, attempt);
                tracing::warn!(
                    "Database connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Backoff before retry number `attempt` (1-based)
fn retry_delay(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
}

/// Attempt to create a database pool (single try)
async fn try_create_pool(config: &DatabaseConfig) -> std::result::Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(StorageError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_secs(2);
        assert_eq!(retry_delay(base, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(4));
        assert_eq!(retry_delay(base, 4), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_retried() {
        let config = DatabaseConfig {
            url: "not-a-url".to_string(),
            max_connections: 1,
            min_connections: 0,
            connection_timeout_secs: 1,
            max_retries: 3,
            retry_delay_secs: 60,
        };

        // A configuration error fails immediately instead of sleeping
        let result = tokio::time::timeout(Duration::from_secs(5), create_pool(&config)).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
