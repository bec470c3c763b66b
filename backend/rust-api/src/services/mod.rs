use crate::config::Config;
use crate::models::sync::{new_shared_status, SharedSyncStatus};
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    /// Present when a Redis URI is configured; guards cycles across processes
    pub redis: Option<ConnectionManager>,
    pub sync_status: SharedSyncStatus,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: Option<redis::Client>,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        let redis = match redis_client {
            Some(client) => Some(connect_redis(client).await?),
            None => {
                tracing::info!("Redis not configured, sync lease disabled");
                None
            }
        };

        Ok(Self {
            config,
            mongo,
            redis,
            sync_status: new_shared_status(),
        })
    }
}

async fn connect_redis(client: redis::Client) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

pub mod cycle_lease;
pub mod id_repair;
pub mod identity_matcher;
pub mod ingestion_service;
pub mod normalizer;
pub mod quiz_source;
pub mod reconciliation_service;
pub mod store;
pub mod sync_worker;
