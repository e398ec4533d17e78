use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::PubSub;
use redis::Client;
use tracing::debug;

use crate::errors::{ProxyError, ProxyResult};
use crate::traits::{ControlChannel, ControlSubscription, StatusStore};

/// Control channel backed by Redis pub/sub.
pub struct RedisControlChannel {
    client: Client,
}

impl RedisControlChannel {
    pub fn new(url: &str) -> ProxyResult<Self> {
        let client = Client::open(url).map_err(|e| {
            ProxyError::ControlChannel(format!("Failed to create Redis client: {e}"))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ControlChannel for RedisControlChannel {
    async fn subscribe(&self, channel: &str) -> ProxyResult<Box<dyn ControlSubscription>> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            ProxyError::ControlChannel(format!("Failed to open pub/sub connection: {e}"))
        })?;
        pubsub.subscribe(channel).await.map_err(|e| {
            ProxyError::ControlChannel(format!("Failed to subscribe to {channel}: {e}"))
        })?;
        debug!("Subscribed to Redis channel {}", channel);

        Ok(Box::new(RedisSubscription { pubsub }))
    }
}

struct RedisSubscription {
    pubsub: PubSub,
}

#[async_trait]
impl ControlSubscription for RedisSubscription {
    async fn next_message(&mut self) -> ProxyResult<Option<String>> {
        let Some(message) = self.pubsub.on_message().next().await else {
            // Stream end means the connection is gone; the listener decides
            // how to reconnect.
            return Ok(None);
        };

        // Payloads are read lossily: a malformed payload becomes an
        // unrecognized token and falls back to "normal" downstream instead
        // of killing the watch loop.
        let payload = String::from_utf8_lossy(message.get_payload_bytes()).into_owned();
        Ok(Some(payload))
    }
}

/// Persisted migration status, read from a plain Redis key at startup.
pub struct RedisStatusStore {
    client: Client,
}

impl RedisStatusStore {
    pub fn new(url: &str) -> ProxyResult<Self> {
        let client = Client::open(url).map_err(|e| {
            ProxyError::StateStore(format!("Failed to create Redis client: {e}"))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn read_status(&self, key: &str) -> ProxyResult<Option<String>> {
        let mut conn = self.client.get_connection_manager().await.map_err(|e| {
            ProxyError::StateStore(format!("Failed to connect to Redis: {e}"))
        })?;

        // Probe the key type first; only a plain string is a usable status.
        let key_type: String = redis::cmd("TYPE")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| ProxyError::StateStore(format!("TYPE {key} failed: {e}")))?;

        match key_type.as_str() {
            "none" => Ok(None),
            "string" => {
                let value: Option<String> = redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| ProxyError::StateStore(format!("GET {key} failed: {e}")))?;
                Ok(value)
            }
            other => Err(ProxyError::StateStore(format!(
                "Unexpected type {other} for key {key}"
            ))),
        }
    }
}
