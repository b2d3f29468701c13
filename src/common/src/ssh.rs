//! SSH 连接描述模型
//!
//! 统一的连接描述定义，可被命令执行核心和 CLI 共享。构造描述对象不会产生任何网络 I/O。

use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::OptionsError;

/// 主机密钥验证策略
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：已知主机校验指纹，未知主机首次接受
    #[default]
    Accept,
    /// 禁用验证（不安全，仅用于测试沙箱）
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// SSH 认证方式
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshAuth {
    /// 私钥认证
    Key {
        /// 私钥内容（OpenSSH / PEM 格式）
        private_key: Secret<String>,
        /// 私钥密码（如果有）
        #[serde(default)]
        passphrase: Option<Secret<String>>,
    },
    /// 密码认证
    Password { password: Secret<String> },
}

impl SshAuth {
    /// 从私钥内容创建认证方式
    pub fn private_key(private_key: impl Into<String>) -> Self {
        SshAuth::Key {
            private_key: Secret::new(private_key.into()),
            passphrase: None,
        }
    }

    pub fn password(password: impl Into<String>) -> Self {
        SshAuth::Password {
            password: Secret::new(password.into()),
        }
    }

    /// 认证方式名称（用于日志，不含敏感内容）
    pub fn method_name(&self) -> &'static str {
        match self {
            SshAuth::Key { .. } => "publickey",
            SshAuth::Password { .. } => "password",
        }
    }
}

/// 连接描述：目标主机、身份、凭据、命令以及可选的跳板机
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionOptions {
    /// 用户名
    pub username: String,

    /// 主机地址
    pub address: String,

    /// 端口
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// 认证方式，按顺序尝试，任意一个成功即可
    #[serde(default)]
    pub auth_methods: Vec<SshAuth>,

    /// 要执行的命令（只对最内层描述有意义）
    #[serde(default)]
    pub command: String,

    /// 跳板机
    #[serde(default)]
    pub jump_host: Option<Box<ConnectionOptions>>,

    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// 主机密钥验证策略
    #[serde(default)]
    pub host_key_verification: HostKeyVerification,

    /// 已知主机指纹，键为 `host:port`，值为 SHA-256 十六进制指纹
    #[serde(default)]
    pub known_hosts: Option<HashMap<String, String>>,
}

pub fn default_ssh_port() -> u16 {
    22
}

pub fn default_connect_timeout() -> u64 {
    10
}

impl ConnectionOptions {
    pub fn new(username: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            username: username.into(),
            address: address.into(),
            port,
            auth_methods: Vec::new(),
            command: String::new(),
            jump_host: None,
            connect_timeout_secs: default_connect_timeout(),
            host_key_verification: HostKeyVerification::default(),
            known_hosts: None,
        }
    }

    /// 追加认证方式
    pub fn with_auth(mut self, auth: SshAuth) -> Self {
        self.auth_methods.push(auth);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// 通过跳板机连接
    pub fn with_jump_host(mut self, jump_host: ConnectionOptions) -> Self {
        self.jump_host = Some(Box::new(jump_host));
        self
    }

    pub fn with_connect_timeout(mut self, timeout_secs: u64) -> Self {
        self.connect_timeout_secs = timeout_secs;
        self
    }

    /// 设置主机密钥验证策略
    pub fn with_host_key_verification(mut self, verification: HostKeyVerification) -> Self {
        self.host_key_verification = verification;
        self
    }

    /// 登记已知主机指纹
    pub fn with_known_host(mut self, host_port: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        self.known_hosts
            .get_or_insert_with(HashMap::new)
            .insert(host_port.into(), fingerprint.into());
        self
    }

    /// 目标地址字符串 `address:port`
    pub fn connection_string(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// 用于日志的目标描述 `user@address:port`
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.address, self.port)
    }

    /// 校验描述是否可直接拨号；带跳板机时跳板机本身也必须可直接拨号
    pub fn validate(&self) -> Result<(), OptionsError> {
        self.validate_endpoint()?;

        if let Some(jump_host) = &self.jump_host {
            if jump_host.jump_host.is_some() {
                return Err(OptionsError::NestedJumpHost(jump_host.connection_string()));
            }
            jump_host.validate_endpoint()?;
        }

        Ok(())
    }

    fn validate_endpoint(&self) -> Result<(), OptionsError> {
        if self.address.trim().is_empty() {
            return Err(OptionsError::MissingAddress);
        }
        if self.port == 0 {
            return Err(OptionsError::InvalidPort(self.address.clone()));
        }
        if self.username.is_empty() {
            return Err(OptionsError::MissingUsername(self.connection_string()));
        }
        if self.auth_methods.is_empty() {
            return Err(OptionsError::NoAuthMethods(self.connection_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(OptionsError::InvalidTimeout(self.connection_string()));
        }
        Ok(())
    }
}

/// 密钥对
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: Secret<String>,
}

impl KeyPair {
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: Secret::new(private_key.into()),
        }
    }
}

/// 待验证的主机（测试环境中创建的实例等）
#[derive(Debug, Clone)]
pub struct Host {
    pub hostname: String,
    pub ssh_user_name: String,
    pub ssh_key_pair: KeyPair,
    pub port: u16,
}

impl Host {
    pub fn new(hostname: impl Into<String>, ssh_user_name: impl Into<String>, ssh_key_pair: KeyPair) -> Self {
        Self {
            hostname: hostname.into(),
            ssh_user_name: ssh_user_name.into(),
            ssh_key_pair,
            port: default_ssh_port(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 构造连接描述
    ///
    /// 测试沙箱里的主机每次创建都会生成新的主机密钥，这里不做主机密钥校验，不可用于生产环境。
    pub fn connection_options(&self, command: impl Into<String>) -> ConnectionOptions {
        ConnectionOptions::new(self.ssh_user_name.clone(), self.hostname.clone(), self.port)
            .with_auth(SshAuth::Key {
                private_key: self.ssh_key_pair.private_key.clone(),
                passphrase: None,
            })
            .with_command(command)
            .with_host_key_verification(HostKeyVerification::Disabled)
    }
}
