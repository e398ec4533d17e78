use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{ProxyError, ProxyResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub proxy: ProxyConfig,
    pub control: ControlConfig,
}

/// HTTP转发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub bind_address: String,
    pub default_backend: String,
    pub legacy_backend: String,
    pub request_timeout_seconds: u64,
    pub max_request_size_mb: u64,
}

/// 控制通道与状态存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub control_url: String,
    pub state_url: String,
    pub channel: String,
    pub status_key: String,
    pub retry_delay_seconds: u64,
    pub max_retry_delay_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig {
                bind_address: "0.0.0.0:5799".to_string(),
                default_backend: "localhost:3456".to_string(),
                legacy_backend: "localhost:3457".to_string(),
                request_timeout_seconds: 30,
                max_request_size_mb: 10,
            },
            control: ControlConfig {
                control_url: "redis://127.0.0.1:6379/".to_string(),
                state_url: "redis://127.0.0.1:6379/".to_string(),
                channel: "migrations".to_string(),
                status_key: "migration_status".to_string(),
                retry_delay_seconds: 5,
                max_retry_delay_seconds: 60,
            },
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/migproxy.toml",
                "migproxy.toml",
                "/etc/migproxy/config.toml",
            ];

            let mut config_file_found = false;
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    config_file_found = true;
                    break;
                }
            }

            if !config_file_found {
                builder = builder
                    .set_default("proxy.bind_address", "0.0.0.0:5799")?
                    .set_default("proxy.default_backend", "localhost:3456")?
                    .set_default("proxy.legacy_backend", "localhost:3457")?
                    .set_default("proxy.request_timeout_seconds", 30)?
                    .set_default("proxy.max_request_size_mb", 10)?
                    .set_default("control.control_url", "redis://127.0.0.1:6379/")?
                    .set_default("control.state_url", "redis://127.0.0.1:6379/")?
                    .set_default("control.channel", "migrations")?
                    .set_default("control.status_key", "migration_status")?
                    .set_default("control.retry_delay_seconds", 5)?
                    .set_default("control.max_retry_delay_seconds", 60)?;
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("MIGPROXY")
                .separator("_")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> ProxyResult<()> {
        self.proxy.validate()?;
        self.control.validate()?;
        Ok(())
    }
}

impl ProxyConfig {
    fn validate(&self) -> ProxyResult<()> {
        for (value, name) in [
            (&self.bind_address, "proxy.bind_address"),
            (&self.default_backend, "proxy.default_backend"),
            (&self.legacy_backend, "proxy.legacy_backend"),
        ] {
            if value.trim().is_empty() {
                return Err(ProxyError::Configuration(format!("{name} 不能为空")));
            }
        }
        if self.request_timeout_seconds == 0 {
            return Err(ProxyError::Configuration(
                "proxy.request_timeout_seconds 必须大于0".to_string(),
            ));
        }
        if self.max_request_size_mb == 0 {
            return Err(ProxyError::Configuration(
                "proxy.max_request_size_mb 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ControlConfig {
    fn validate(&self) -> ProxyResult<()> {
        for (value, name) in [
            (&self.control_url, "control.control_url"),
            (&self.state_url, "control.state_url"),
            (&self.channel, "control.channel"),
            (&self.status_key, "control.status_key"),
        ] {
            if value.trim().is_empty() {
                return Err(ProxyError::Configuration(format!("{name} 不能为空")));
            }
        }
        if self.max_retry_delay_seconds < self.retry_delay_seconds {
            return Err(ProxyError::Configuration(
                "control.max_retry_delay_seconds 不能小于 control.retry_delay_seconds".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.proxy.bind_address, "0.0.0.0:5799");
        assert_eq!(config.proxy.default_backend, "localhost:3456");
        assert_eq!(config.proxy.legacy_backend, "localhost:3457");
        assert_eq!(config.control.channel, "migrations");
        assert_eq!(config.control.status_key, "migration_status");
    }

    #[test]
    fn test_app_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_serialization() {
        let config = AppConfig::default();
        let serialized = serde_json::to_string(&config).expect("Failed to serialize");
        let deserialized: AppConfig =
            serde_json::from_str(&serialized).expect("Failed to deserialize");

        assert_eq!(config.proxy.bind_address, deserialized.proxy.bind_address);
        assert_eq!(config.control.channel, deserialized.control.channel);
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[proxy]
bind_address = "0.0.0.0:8080"
default_backend = "app-new:9000"
legacy_backend = "app-old:9000"
request_timeout_seconds = 10
max_request_size_mb = 4

[control]
control_url = "redis://redis-control:6379/"
state_url = "redis://redis-state:6379/"
channel = "migrations"
status_key = "migration_status"
retry_delay_seconds = 2
max_retry_delay_seconds = 30
"#;

        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.proxy.bind_address, "0.0.0.0:8080");
        assert_eq!(config.proxy.default_backend, "app-new:9000");
        assert_eq!(config.control.control_url, "redis://redis-control:6379/");
        assert_eq!(config.control.retry_delay_seconds, 2);
    }

    #[test]
    fn test_empty_backend_is_rejected() {
        let mut config = AppConfig::default();
        config.proxy.default_backend = "".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_cap_below_base_is_rejected() {
        let mut config = AppConfig::default();
        config.control.retry_delay_seconds = 30;
        config.control.max_retry_delay_seconds = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_toml_round_trip() {
        let config = AppConfig::default();
        let rendered = config.to_toml().expect("Failed to render TOML");
        let parsed = AppConfig::from_toml(&rendered).expect("Failed to reparse TOML");
        assert_eq!(parsed.proxy.bind_address, config.proxy.bind_address);
        assert_eq!(parsed.control.status_key, config.control.status_key);
    }
}
