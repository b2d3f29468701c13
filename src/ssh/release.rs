//! 资源释放
//! 所有连接、通道、握手结果都实现同一个 `Releasable` 能力，清理代码只面向该能力迭代

use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

use crate::error::CloseError;

/// 可释放的网络资源
#[async_trait]
pub trait Releasable: Send + Sync {
    async fn release(&self) -> Result<(), CloseError>;
}

/// 资源标识（日志字段和清理报告使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// 命令执行通道
    Session,
    /// 目标主机的多路复用连接
    Client,
    /// 隧道内完成的目标主机握手结果
    HostConnection,
    /// 经跳板机打开的虚拟字节流
    HostVirtualConnection,
    /// 跳板机连接
    JumpHostClient,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Session => "session",
            ResourceKind::Client => "client",
            ResourceKind::HostConnection => "host_connection",
            ResourceKind::HostVirtualConnection => "host_virtual_connection",
            ResourceKind::JumpHostClient => "jump_host_client",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 非致命的释放失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub resource: ResourceKind,
    pub error: String,
}

/// 一次清理的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// 按释放顺序记录的资源（包含被忽略错误的资源）
    pub released: Vec<ResourceKind>,
    /// 因“已关闭”被忽略的错误
    pub suppressed: Vec<ResourceKind>,
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// 尝试释放的资源数量
    pub fn attempted(&self) -> usize {
        self.released.len() + self.warnings.len()
    }
}

/// 释放单个资源
///
/// 失败只记录日志，不向上传播；“已关闭”类错误不报告。
pub async fn close(resource: ResourceKind, releasable: &dyn Releasable, report: &mut CleanupReport) {
    match releasable.release().await {
        Ok(()) => {
            debug!(resource = %resource, "Resource released");
            report.released.push(resource);
        }
        Err(e) if e.is_already_closed() => {
            debug!(
                resource = %resource,
                suppressed = true,
                error = %e,
                "Resource was already closed by the remote side"
            );
            report.released.push(resource);
            report.suppressed.push(resource);
        }
        Err(e) => {
            warn!(
                resource = %resource,
                suppressed = false,
                error = %e,
                "Error closing resource"
            );
            report.warnings.push(CleanupWarning {
                resource,
                error: e.to_string(),
            });
        }
    }
}

/// 按给定顺序释放一组资源，空槽位直接跳过
pub async fn close_all(slots: Vec<(ResourceKind, Option<&dyn Releasable>)>) -> CleanupReport {
    let mut report = CleanupReport::default();
    for (resource, releasable) in slots {
        if let Some(releasable) = releasable {
            close(resource, releasable, &mut report).await;
        }
    }
    report
}
