//! 跳板机隧道
//!
//! 经已建立的跳板机连接打开到目标地址的虚拟字节流，再在该字节流上（而非新的 TCP 连接上）
//! 完成目标主机的 SSH 握手，得到一个独立的多路复用连接。

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

use crate::error::{CloseError, Result, SshError};
use crate::ssh::release::Releasable;
use crate::ssh::session::JumpHostSession;
use crate::ssh::transport::Transport;
use infratest_common::ConnectionOptions;

/// 经跳板机建立到目标主机的连接
///
/// 虚拟连接与握手结果按创建顺序记录到 `jump_host` 中，任一步失败时已记录的资源仍由调用方的清理释放。
pub async fn build_tunnel<T: Transport>(
    transport: &T,
    jump_host: &mut JumpHostSession<T>,
    jump_options: &ConnectionOptions,
    target: &ConnectionOptions,
) -> Result<T::Client> {
    let via = jump_host.jump_host_client.as_ref().ok_or_else(|| SshError::TunnelDial {
        via: jump_options.connection_string(),
        address: target.connection_string(),
        reason: "jump host is not connected".to_string(),
    })?;

    debug!(
        jump_host = %jump_options.connection_string(),
        host = %target.connection_string(),
        "Opening virtual connection through jump host"
    );
    let (virtual_connection, stream) = transport
        .open_tunnel(via, &target.address, target.port)
        .await?;
    jump_host.host_virtual_connection = Some(virtual_connection);

    debug!(host = %target.target(), "Performing SSH handshake over tunnel");
    let handshake = transport.handshake(stream, target).await?;
    let handshake = jump_host.host_connection.insert(handshake);

    Ok(transport.client_from_handshake(handshake))
}

/// 可作为隧道承载的字节流
pub trait TunnelIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> TunnelIo for S {}

type SharedIo = Arc<Mutex<Option<Box<dyn TunnelIo>>>>;

/// 交给握手使用的字节流端
///
/// 底层流被 `VirtualConnection` 释放后，读返回 EOF，写返回 `BrokenPipe`。
pub struct TunnelStream {
    inner: SharedIo,
}

/// 虚拟连接句柄，可独立于消费字节流的握手单独关闭
pub struct VirtualConnection {
    inner: SharedIo,
    address: String,
}

/// 将底层字节流拆分为握手端与可释放句柄
pub fn split_tunnel<S: TunnelIo + 'static>(
    io: S,
    address: impl Into<String>,
) -> (VirtualConnection, TunnelStream) {
    let boxed: Box<dyn TunnelIo> = Box::new(io);
    let inner: SharedIo = Arc::new(Mutex::new(Some(boxed)));
    (
        VirtualConnection {
            inner: inner.clone(),
            address: address.into(),
        },
        TunnelStream { inner },
    )
}

impl VirtualConnection {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().map(|io| io.is_some()).unwrap_or(false)
    }
}

#[async_trait]
impl Releasable for VirtualConnection {
    async fn release(&self) -> std::result::Result<(), CloseError> {
        let io = self
            .inner
            .lock()
            .map_err(|_| CloseError::Other("tunnel lock poisoned".to_string()))?
            .take();

        match io {
            Some(mut io) => io.shutdown().await.map_err(CloseError::from),
            None => Err(CloseError::AlreadyClosed(format!(
                "virtual connection to {} already closed",
                self.address
            ))),
        }
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "tunnel lock poisoned")
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "virtual connection closed")
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return Poll::Ready(Err(poisoned())),
        };
        match guard.as_mut() {
            Some(io) => Pin::new(io).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return Poll::Ready(Err(poisoned())),
        };
        match guard.as_mut() {
            Some(io) => Pin::new(io).poll_write(cx, buf),
            None => Poll::Ready(Err(closed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return Poll::Ready(Err(poisoned())),
        };
        match guard.as_mut() {
            Some(io) => Pin::new(io).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return Poll::Ready(Err(poisoned())),
        };
        match guard.as_mut() {
            Some(io) => Pin::new(io).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
