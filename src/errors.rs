use thiserror::Error;

/// 代理错误类型定义
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("控制通道错误: {0}")]
    ControlChannel(String),

    #[error("状态存储错误: {0}")]
    StateStore(String),

    #[error("上游请求错误: {0}")]
    Upstream(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;
