//! 会话状态
//!
//! 一次命令调用中打开的所有资源都记录在 `SshSession` 里，调用结束时通过一次
//! `cleanup` 按获取顺序的逆序释放，无论调用成功还是在中途失败。

use tracing::{debug, info};

use crate::error::{Result, SshError};
use crate::ssh::release::{close_all, CleanupReport, Releasable, ResourceKind};
use crate::ssh::transport::Transport;
use crate::ssh::tunnel::build_tunnel;
use infratest_common::ConnectionOptions;

/// 经跳板机建立连接时打开的资源，按获取顺序排列
pub struct JumpHostSession<T: Transport> {
    pub jump_host_client: Option<T::Client>,
    pub host_virtual_connection: Option<T::Tunnel>,
    pub host_connection: Option<T::Handshake>,
}

impl<T: Transport> Default for JumpHostSession<T> {
    fn default() -> Self {
        Self {
            jump_host_client: None,
            host_virtual_connection: None,
            host_connection: None,
        }
    }
}

impl<T: Transport> JumpHostSession<T> {
    fn is_empty(&self) -> bool {
        self.jump_host_client.is_none()
            && self.host_virtual_connection.is_none()
            && self.host_connection.is_none()
    }
}

/// 单次调用独占的会话状态，不可跨调用复用
pub struct SshSession<'a, T: Transport> {
    pub options: &'a ConnectionOptions,
    pub client: Option<T::Client>,
    pub session: Option<T::Session>,
    pub jump_host: Option<JumpHostSession<T>>,
}

impl<'a, T: Transport> SshSession<'a, T> {
    pub fn new(options: &'a ConnectionOptions) -> Self {
        Self {
            options,
            client: None,
            session: None,
            jump_host: None,
        }
    }

    /// 建立连接、打开会话并执行命令
    pub async fn run(&mut self, transport: &T) -> Result<Vec<u8>> {
        let options = self.options;
        options.validate()?;

        self.set_up_client(transport).await?;
        let session = self.set_up_session(transport).await?;

        debug!(host = %options.target(), command = %options.command, "Executing SSH command");
        let output = transport.exec(session, options).await?;

        info!(
            host = %options.target(),
            output_len = output.len(),
            "SSH command completed"
        );
        Ok(output)
    }

    /// 建立到目标主机的多路复用连接，必要时经跳板机隧道
    pub async fn set_up_client(&mut self, transport: &T) -> Result<&T::Client> {
        let options = self.options;
        match options.jump_host.as_deref() {
            None => self.fill_client_for_host(transport).await,
            Some(jump_host) => self.fill_client_for_jump_host(transport, jump_host).await,
        }
    }

    async fn fill_client_for_host(&mut self, transport: &T) -> Result<&T::Client> {
        debug!(host = %self.options.target(), "Dialing SSH host");
        let client = transport.dial(self.options).await?;
        Ok(self.client.insert(client))
    }

    async fn fill_client_for_jump_host(
        &mut self,
        transport: &T,
        jump_options: &ConnectionOptions,
    ) -> Result<&T::Client> {
        debug!(
            jump_host = %jump_options.target(),
            host = %self.options.target(),
            "Dialing SSH jump host"
        );

        let jump_host = self.jump_host.insert(JumpHostSession::default());
        let jump_client = transport.dial(jump_options).await?;
        jump_host.jump_host_client = Some(jump_client);

        let client = build_tunnel(transport, jump_host, jump_options, self.options).await?;
        Ok(self.client.insert(client))
    }

    /// 在目标连接上打开唯一的执行通道
    pub async fn set_up_session(&mut self, transport: &T) -> Result<&mut T::Session> {
        let client = self.client.as_ref().ok_or_else(|| {
            SshError::session_open(self.options.connection_string(), "no established connection")
        })?;

        let session = transport.open_session(client, self.options).await?;
        Ok(self.session.insert(session))
    }

    /// 按获取顺序的逆序释放所有已打开的资源
    ///
    /// 释放失败只记录告警，不会中断后续释放；空槽位直接跳过。完成后所有槽位被清空，重复调用不会再次释放。
    pub async fn cleanup(&mut self) -> CleanupReport {
        let jump_host = self.jump_host.as_ref();

        let report = close_all(vec![
            (ResourceKind::Session, as_releasable(&self.session)),
            (ResourceKind::Client, as_releasable(&self.client)),
            (
                ResourceKind::HostConnection,
                jump_host.and_then(|j| as_releasable(&j.host_connection)),
            ),
            (
                ResourceKind::HostVirtualConnection,
                jump_host.and_then(|j| as_releasable(&j.host_virtual_connection)),
            ),
            (
                ResourceKind::JumpHostClient,
                jump_host.and_then(|j| as_releasable(&j.jump_host_client)),
            ),
        ])
        .await;

        self.session = None;
        self.client = None;
        self.jump_host = None;

        debug!(
            host = %self.options.target(),
            released = report.released.len(),
            warnings = report.warnings.len(),
            "SSH session cleaned up"
        );
        report
    }

    /// 是否仍持有未释放的资源
    pub fn holds_resources(&self) -> bool {
        self.session.is_some()
            || self.client.is_some()
            || self.jump_host.as_ref().is_some_and(|j| !j.is_empty())
    }
}

fn as_releasable<R: Releasable + 'static>(slot: &Option<R>) -> Option<&dyn Releasable> {
    slot.as_ref().map(|r| r as &dyn Releasable)
}

/// 执行一次完整调用：建立连接、执行命令、清理资源
///
/// 清理总会执行，且不会覆盖调用本身的错误。
pub async fn run_ssh_command<T: Transport>(
    transport: &T,
    options: &ConnectionOptions,
) -> Result<Vec<u8>> {
    let mut session = SshSession::new(options);
    let result = session.run(transport).await;
    session.cleanup().await;

    if let Err(e) = &result {
        debug!(host = %options.target(), phase = e.phase(), error = %e, "SSH command failed");
    }
    result
}
