use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::proxy::create_app;
use crate::recovery::recover_initial_state;
use crate::redis_control::{RedisControlChannel, RedisStatusStore};
use crate::routing::{Director, RoutingFlag};
use crate::status_listener::StatusListener;
use crate::traits::ControlChannel;

/// 主应用程序
pub struct Application {
    config: AppConfig,
    routing: RoutingFlag,
    listener: StatusListener,
}

impl Application {
    /// 创建应用实例：恢复初始迁移状态并建立控制频道订阅
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化迁移代理");

        // 恢复持久化的迁移状态（任何歧义回退到 normal，不阻塞启动）
        let store = RedisStatusStore::new(&config.control.state_url)
            .context("创建状态存储客户端失败")?;
        let initial_state = recover_initial_state(&store, &config.control.status_key).await;

        let routing = RoutingFlag::new(initial_state.routes_to_default());
        info!(
            "初始迁移状态: {initial_state}，路由默认后端: {}",
            routing.get()
        );

        // 建立控制频道订阅；失败则拒绝启动
        let channel: Arc<dyn ControlChannel> = Arc::new(
            RedisControlChannel::new(&config.control.control_url)
                .context("创建控制通道客户端失败")?,
        );
        let listener = StatusListener::connect(
            channel,
            routing.clone(),
            initial_state,
            config.control.clone(),
        )
        .await
        .context("订阅控制频道失败，Redis 是否已启动?")?;

        Ok(Self {
            config,
            routing,
            listener,
        })
    }

    /// 运行代理：启动状态监听任务与HTTP转发服务
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let Self {
            config,
            routing,
            listener,
        } = self;

        // 启动状态监听任务
        let listener_handle = {
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(listener.run(shutdown_rx))
        };

        // 创建转发应用
        let director = Director::new(
            routing,
            config.proxy.default_backend.clone(),
            config.proxy.legacy_backend.clone(),
        );
        let app = create_app(director, &config.proxy)?;

        let tcp_listener = TcpListener::bind(&config.proxy.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", config.proxy.bind_address))?;
        info!("代理服务启动在 http://{}", config.proxy.bind_address);

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(tcp_listener, app.into_make_service()).await {
                error!("代理服务运行失败: {e}");
            }
        });

        // 等待关闭信号
        let _ = shutdown_rx.recv().await;
        info!("代理收到关闭信号");

        // 停止HTTP服务并等待监听任务释放订阅
        server_handle.abort();
        let _ = listener_handle.await;

        info!("代理已停止");
        Ok(())
    }
}
