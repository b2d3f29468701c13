//! 统一错误模型
//! 按失败阶段区分：拨号、隧道、握手、会话、命令执行；资源释放错误单独建模，从不作为调用结果返回

use infratest_common::OptionsError;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, SshError>;

/// SSH 执行错误
#[derive(Debug, Error)]
pub enum SshError {
    #[error("Invalid connection options: {0}")]
    InvalidOptions(#[from] OptionsError),

    #[error("Failed to dial {address}: {reason}")]
    Dial { address: String, reason: String },

    #[error("Failed to open tunnel to {address} through {via}: {reason}")]
    TunnelDial {
        via: String,
        address: String,
        reason: String,
    },

    #[error("SSH handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("Invalid credentials: {0}")]
    Credentials(String),

    #[error("Failed to open session on {address}: {reason}")]
    SessionOpen { address: String, reason: String },

    #[error("Command on {address} failed: {reason}")]
    CommandExecution {
        address: String,
        reason: String,
        exit_status: Option<u32>,
    },
}

impl SshError {
    /// 失败阶段名称（用于日志字段）
    pub fn phase(&self) -> &'static str {
        match self {
            SshError::InvalidOptions(_) => "options",
            SshError::Dial { .. } => "dial",
            SshError::TunnelDial { .. } => "tunnel",
            SshError::Handshake { .. } | SshError::Credentials(_) => "handshake",
            SshError::SessionOpen { .. } => "session",
            SshError::CommandExecution { .. } => "execution",
        }
    }

    pub fn dial(address: impl Into<String>, reason: impl ToString) -> Self {
        SshError::Dial {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn handshake(address: impl Into<String>, reason: impl ToString) -> Self {
        SshError::Handshake {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn session_open(address: impl Into<String>, reason: impl ToString) -> Self {
        SshError::SessionOpen {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// 远程命令退出码非零
    pub fn exit_status(address: impl Into<String>, exit_status: u32) -> Self {
        SshError::CommandExecution {
            address: address.into(),
            reason: format!("process exited with status {}", exit_status),
            exit_status: Some(exit_status),
        }
    }

    pub fn execution(address: impl Into<String>, reason: impl ToString) -> Self {
        SshError::CommandExecution {
            address: address.into(),
            reason: reason.to_string(),
            exit_status: None,
        }
    }
}

/// 资源关闭错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseError {
    /// 对端已关闭（EOF、断开、管道破裂），远程 shell 自行退出时属于正常情况
    #[error("already closed: {0}")]
    AlreadyClosed(String),

    #[error("{0}")]
    Other(String),
}

impl CloseError {
    /// 按错误文本归类
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_closed_message(&message) {
            CloseError::AlreadyClosed(message)
        } else {
            CloseError::Other(message)
        }
    }

    pub fn is_already_closed(&self) -> bool {
        matches!(self, CloseError::AlreadyClosed(_))
    }
}

fn is_closed_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message == "eof"
        || message.contains("unexpected eof")
        || message.contains("already closed")
        || message.contains("channel closed")
        || message.contains("connection closed")
        || message.contains("broken pipe")
        || message.contains("disconnected")
}

impl From<std::io::Error> for CloseError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match e.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected => CloseError::AlreadyClosed(e.to_string()),
            _ => CloseError::from_message(e.to_string()),
        }
    }
}

impl From<russh::Error> for CloseError {
    fn from(e: russh::Error) -> Self {
        match e {
            russh::Error::Disconnect | russh::Error::SendError => {
                CloseError::AlreadyClosed(e.to_string())
            }
            russh::Error::IO(io) => CloseError::from(io),
            other => CloseError::from_message(other.to_string()),
        }
    }
}
