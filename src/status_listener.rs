use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ControlConfig;
use crate::errors::ProxyResult;
use crate::migration::MigrationState;
use crate::routing::RoutingFlag;
use crate::traits::{ControlChannel, ControlSubscription};

/// 迁移状态监听器
///
/// 持续消费控制频道上的状态消息，驱动状态机并发布路由开关。
/// 迁移状态仅存在于监听器内部，其他组件只能读取路由开关。
pub struct StatusListener {
    channel: Arc<dyn ControlChannel>,
    subscription: Box<dyn ControlSubscription>,
    routing: RoutingFlag,
    state: MigrationState,
    config: ControlConfig,
}

impl StatusListener {
    /// 建立初始订阅
    ///
    /// 订阅失败是致命错误：对迁移状态失明的代理不允许开始转发流量。
    pub async fn connect(
        channel: Arc<dyn ControlChannel>,
        routing: RoutingFlag,
        initial_state: MigrationState,
        config: ControlConfig,
    ) -> ProxyResult<Self> {
        let subscription = channel.subscribe(&config.channel).await?;
        info!("已订阅控制频道: {}", config.channel);

        Ok(Self {
            channel,
            subscription,
            routing,
            state: initial_state,
            config,
        })
    }

    /// 监听循环，进程存活期间持续运行
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let event = tokio::select! {
                _ = shutdown_rx.recv() => None,
                message = self.subscription.next_message() => Some(message),
            };

            match event {
                None => {
                    info!("状态监听器收到关闭信号");
                    break;
                }
                Some(Ok(Some(token))) => self.apply(&token),
                Some(Ok(None)) => {
                    warn!("控制频道连接断开，开始重连");
                    if !self.resubscribe(&mut shutdown_rx).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("读取控制消息失败: {e}，开始重连");
                    if !self.resubscribe(&mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        info!("状态监听器已停止");
    }

    /// 处理一条控制消息：解码、转移状态、发布路由开关
    fn apply(&mut self, token: &str) {
        let incoming = MigrationState::decode(token);
        let (next, route_to_default) = self.state.transition(incoming);

        if next != self.state {
            info!("迁移状态变更: {} -> {}", self.state, next);
        } else {
            debug!("迁移状态保持 {}", self.state);
        }

        self.state = next;
        self.routing.set(route_to_default);
    }

    /// 带退避的重连；重连期间继续按最近一次状态路由
    ///
    /// 返回 false 表示重连期间收到了关闭信号。
    async fn resubscribe(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let mut delay = Duration::from_secs(self.config.retry_delay_seconds);
        let max_delay = Duration::from_secs(self.config.max_retry_delay_seconds);

        loop {
            match self.channel.subscribe(&self.config.channel).await {
                Ok(subscription) => {
                    self.subscription = subscription;
                    info!("已重新订阅控制频道: {}", self.config.channel);
                    return true;
                }
                Err(e) => {
                    warn!("重连控制频道失败: {e}，{}秒后重试", delay.as_secs());
                }
            }

            let interrupted = tokio::select! {
                _ = shutdown_rx.recv() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if interrupted {
                info!("重连期间收到关闭信号");
                return false;
            }

            delay = (delay * 2).min(max_delay);
        }
    }
}
