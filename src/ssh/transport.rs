//! 传输层抽象
//!
//! 建立连接、打开隧道、在隧道上握手、打开执行通道都经由 `Transport`，
//! 会话状态与清理逻辑只依赖这些操作，不依赖具体的 SSH 实现。

use async_trait::async_trait;

use crate::error::Result;
use crate::ssh::release::Releasable;
use infratest_common::ConnectionOptions;

/// SSH 传输实现
///
/// 每个方法对应一个可独立失败的阶段，错误类型已按阶段区分：
/// `dial` 产生 `Dial`/`Handshake`，`open_tunnel` 产生 `TunnelDial`，
/// `handshake` 产生 `Handshake`，`open_session` 产生 `SessionOpen`，
/// `exec` 产生 `CommandExecution`。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 多路复用连接
    type Client: Releasable + 'static;
    /// 经由跳板机打开的虚拟连接句柄
    type Tunnel: Releasable + 'static;
    /// 虚拟连接承载的字节流，由握手消费
    type Stream: Send + 'static;
    /// 在字节流上完成的握手结果
    type Handshake: Releasable + 'static;
    /// 命令执行通道
    type Session: Releasable + 'static;

    /// 直连目标主机并完成握手与认证
    async fn dial(&self, options: &ConnectionOptions) -> Result<Self::Client>;

    /// 通过已建立的连接打开到 `address:port` 的虚拟字节流
    async fn open_tunnel(
        &self,
        via: &Self::Client,
        address: &str,
        port: u16,
    ) -> Result<(Self::Tunnel, Self::Stream)>;

    /// 在虚拟字节流上完成目标主机的握手与认证
    async fn handshake(
        &self,
        stream: Self::Stream,
        options: &ConnectionOptions,
    ) -> Result<Self::Handshake>;

    /// 将握手结果包装为可用的多路复用连接
    fn client_from_handshake(&self, handshake: &Self::Handshake) -> Self::Client;

    async fn open_session(&self, client: &Self::Client, options: &ConnectionOptions) -> Result<Self::Session>;

    /// 执行命令，阻塞直到远程命令结束，返回合并后的 stdout/stderr
    async fn exec(
        &self,
        session: &mut Self::Session,
        options: &ConnectionOptions,
    ) -> Result<Vec<u8>>;
}
