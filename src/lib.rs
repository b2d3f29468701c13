//! 基础设施测试工具库
//! 通过 SSH（可经跳板机）在目标主机上执行命令

pub mod config;
pub mod error;
pub mod ssh;
pub mod telemetry;

pub use error::{CloseError, Result, SshError};
pub use infratest_common::{ConnectionOptions, Host, HostKeyVerification, KeyPair, SshAuth};
