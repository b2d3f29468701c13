//! 配置系统
//! 从环境变量加载日志与 SSH 默认配置（前缀 INFRATEST_，层级分隔符 __）

use config::{Config, ConfigError, Environment};
use infratest_common::HostKeyVerification;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, plain
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshSettings {
    /// 默认 SSH 用户名
    pub default_username: String,
    /// 默认端口
    pub default_port: u16,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 主机密钥验证策略（strict/accept/disabled）
    pub host_key_verification: String,
}

impl SshSettings {
    /// 解析主机密钥验证策略
    pub fn host_key_verification(&self) -> Result<HostKeyVerification, ConfigError> {
        self.host_key_verification
            .parse()
            .map_err(ConfigError::Message)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub ssh: SshSettings,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.format", "plain")?
            .set_default("ssh.default_username", "root")?
            .set_default("ssh.default_port", 22)?
            .set_default("ssh.connect_timeout_secs", 10)?
            .set_default("ssh.host_key_verification", "accept")?
            .add_source(
                Environment::with_prefix("INFRATEST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "plain" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, plain",
                    self.logging.format
                )))
            }
        }

        if self.ssh.default_port == 0 {
            return Err(ConfigError::Message("ssh.default_port must be > 0".to_string()));
        }

        if self.ssh.connect_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "ssh.connect_timeout_secs must be > 0".to_string(),
            ));
        }

        self.ssh.host_key_verification()?;

        Ok(())
    }
}
