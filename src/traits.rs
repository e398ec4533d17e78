use async_trait::async_trait;

use crate::errors::ProxyResult;

/// 控制通道抽象接口
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// 订阅指定的控制频道
    async fn subscribe(&self, channel: &str) -> ProxyResult<Box<dyn ControlSubscription>>;
}

/// 控制频道订阅
#[async_trait]
pub trait ControlSubscription: Send {
    /// 等待下一条控制消息；连接断开时返回 Ok(None)
    async fn next_message(&mut self) -> ProxyResult<Option<String>>;
}

/// 迁移状态存储抽象接口
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// 读取持久化的迁移状态令牌；键不存在时返回 Ok(None)
    async fn read_status(&self, key: &str) -> ProxyResult<Option<String>>;
}
