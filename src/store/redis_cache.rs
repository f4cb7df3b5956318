use crate::error::Result;
use crate::models::CachedQueueItem;
use crate::store::QueueCache;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

/// Queue mirror kept as one JSON string per user
#[derive(Clone)]
pub struct RedisQueueCache {
    redis: ConnectionManager,
}

impl RedisQueueCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(user_id: Uuid) -> String {
        format!("queue:{}", user_id)
    }
}

#[async_trait]
impl QueueCache for RedisQueueCache {
    async fn write(&self, user_id: Uuid, items: &[CachedQueueItem]) -> Result<()> {
        let payload = serde_json::to_string(items)?;
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(Self::key(user_id), payload).await?;
        Ok(())
    }

    async fn read(&self, user_id: Uuid) -> Result<Vec<CachedQueueItem>> {
        let mut conn = self.redis.clone();
        let payload: Option<String> = conn.get(Self::key(user_id)).await?;

        match payload {
            Some(json) if !json.is_empty() => Ok(serde_json::from_str(&json)?),
            _ => Ok(Vec::new()),
        }
    }

    async fn clear(&self, user_id: Uuid) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(Self::key(user_id)).await?;
        Ok(())
    }
}
