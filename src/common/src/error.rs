//! 连接描述校验错误

/// 连接描述不可用时返回的错误，在任何网络 I/O 之前产生
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("missing target address")]
    MissingAddress,

    #[error("invalid port 0 for {0}")]
    InvalidPort(String),

    #[error("missing username for {0}")]
    MissingUsername(String),

    #[error("no authentication methods configured for {0}")]
    NoAuthMethods(String),

    #[error("connect timeout must be greater than zero for {0}")]
    InvalidTimeout(String),

    #[error("jump host {0} has its own jump host; only a single hop is supported")]
    NestedJumpHost(String),
}
