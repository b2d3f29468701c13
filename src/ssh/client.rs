//! 基于 russh 的传输实现
//!
//! 直连时先建立 TCP 连接再在其上握手；经跳板机时在 direct-tcpip 通道的字节流上握手。
//! 两条路径共用同一套握手与认证逻辑。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use secrecy::ExposeSecret;
use sha2::Digest;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{CloseError, Result, SshError};
use crate::ssh::release::Releasable;
use crate::ssh::transport::Transport;
use crate::ssh::tunnel::{split_tunnel, TunnelStream, VirtualConnection};
use infratest_common::{ConnectionOptions, HostKeyVerification, SshAuth};

/// SSH_EXTENDED_DATA_STDERR
const EXTENDED_DATA_STDERR: u32 = 1;

/// 断开后等待会话任务退出的最长时间
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// 计算主机公钥指纹（base64 编码后的 SHA-256 十六进制）
pub fn fingerprint(key: &PublicKey) -> String {
    let key_data = key.public_key_base64();
    let mut hasher = sha2::Sha256::new();
    hasher.update(key_data.as_bytes());
    hex::encode(hasher.finalize())
}

/// 基于 russh 的传输
#[derive(Clone)]
pub struct RusshTransport {
    config: Arc<Config>,
}

impl Default for RusshTransport {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl RusshTransport {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// 在任意字节流上完成握手与认证
    ///
    /// 返回的接收端在会话任务退出（处理器被释放）时关闭。
    async fn establish<S>(&self, stream: S, options: &ConnectionOptions) -> Result<SessionHandle>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let address = options.connection_string();
        let (alive, closed) = watch::channel(());
        let handler = ClientHandler::for_options(options).with_session_alive(alive);

        let mut handle = timeout(
            Duration::from_secs(options.connect_timeout_secs),
            client::connect_stream(self.config.clone(), stream, handler),
        )
        .await
        .map_err(|_| {
            SshError::handshake(
                &address,
                format!("timed out after {}s", options.connect_timeout_secs),
            )
        })?
        .map_err(|e| {
            error!(host = %address, error = %e, "SSH handshake failed");
            SshError::handshake(&address, e)
        })?;

        match authenticate(&mut handle, options).await {
            Ok(()) => {
                debug!(host = %options.target(), "SSH authentication succeeded");
                Ok(SessionHandle {
                    handle: Arc::new(handle),
                    closed,
                })
            }
            Err(e) => {
                // 握手已完成但认证失败，连接不会被记录，这里直接断开
                if let Err(close_err) = handle
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await
                {
                    debug!(host = %address, error = %close_err, "Error disconnecting unauthenticated session");
                }
                Err(e)
            }
        }
    }
}

/// 按顺序尝试认证方式，任意一个成功即可
async fn authenticate(handle: &mut Handle<ClientHandler>, options: &ConnectionOptions) -> Result<()> {
    let address = options.connection_string();
    let mut attempted = Vec::new();

    for auth in &options.auth_methods {
        attempted.push(auth.method_name());

        let accepted = match auth {
            SshAuth::Key {
                private_key,
                passphrase,
            } => {
                let key = russh_keys::decode_secret_key(
                    private_key.expose_secret(),
                    passphrase.as_ref().map(|p| p.expose_secret().as_str()),
                )
                .map_err(|e| {
                    error!(host = %address, error = %e, "Failed to decode private key");
                    SshError::Credentials(format!("failed to decode private key: {}", e))
                })?;

                handle
                    .authenticate_publickey(options.username.clone(), Arc::new(key))
                    .await
            }
            SshAuth::Password { password } => {
                handle
                    .authenticate_password(options.username.clone(), password.expose_secret().as_str())
                    .await
            }
        }
        .map_err(|e| SshError::handshake(&address, e))?;

        if accepted {
            return Ok(());
        }
        debug!(host = %address, method = auth.method_name(), "SSH authentication method rejected");
    }

    error!(host = %options.target(), "SSH authentication failed");
    Err(SshError::handshake(
        address,
        format!(
            "unable to authenticate as {}, attempted methods [{}]",
            options.username,
            attempted.join(", ")
        ),
    ))
}

/// 已认证的 russh 会话句柄
///
/// `closed` 在会话任务退出后关闭，用于确认断开消息已经写出。
#[derive(Clone)]
struct SessionHandle {
    handle: Arc<Handle<ClientHandler>>,
    closed: watch::Receiver<()>,
}

impl SessionHandle {
    /// 请求断开并等待会话任务退出
    ///
    /// `disconnect` 只是把断开消息交给会话任务；经隧道的会话必须在虚拟连接关闭前完成写出。
    async fn disconnect(&self, address: &str) -> std::result::Result<(), CloseError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(CloseError::from)?;

        let mut closed = self.closed.clone();
        if timeout(SESSION_CLOSE_TIMEOUT, closed.changed()).await.is_err() {
            debug!(host = %address, "Timed out waiting for SSH session to close");
        }
        Ok(())
    }
}

/// 多路复用连接（直连或经隧道握手得到）
#[derive(Clone)]
pub struct SshClient {
    session: SessionHandle,
    address: String,
}

impl SshClient {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// 会话任务是否已退出
    pub fn is_closed(&self) -> bool {
        self.session.closed.has_changed().is_err()
    }
}

impl fmt::Debug for SshClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Releasable for SshClient {
    async fn release(&self) -> std::result::Result<(), CloseError> {
        self.session.disconnect(&self.address).await
    }
}

/// 隧道内完成的握手结果，与 `SshClient` 共享底层会话
///
/// 目标连接先于它被关闭时，这里的断开会得到“已关闭”类错误。
pub struct HostConnection {
    session: SessionHandle,
    address: String,
}

impl fmt::Debug for HostConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConnection")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Releasable for HostConnection {
    async fn release(&self) -> std::result::Result<(), CloseError> {
        self.session.disconnect(&self.address).await
    }
}

/// 命令执行通道
pub struct ExecSession {
    channel: Mutex<Channel<Msg>>,
}

#[async_trait]
impl Releasable for ExecSession {
    async fn release(&self) -> std::result::Result<(), CloseError> {
        self.channel.lock().await.close().await.map_err(CloseError::from)
    }
}

#[async_trait]
impl Transport for RusshTransport {
    type Client = SshClient;
    type Tunnel = VirtualConnection;
    type Stream = TunnelStream;
    type Handshake = HostConnection;
    type Session = ExecSession;

    async fn dial(&self, options: &ConnectionOptions) -> Result<SshClient> {
        let address = options.connection_string();

        let stream = timeout(
            Duration::from_secs(options.connect_timeout_secs),
            TcpStream::connect((options.address.as_str(), options.port)),
        )
        .await
        .map_err(|_| {
            SshError::dial(
                &address,
                format!("timed out after {}s", options.connect_timeout_secs),
            )
        })?
        .map_err(|e| {
            error!(host = %address, error = %e, "TCP connection failed");
            SshError::dial(&address, e)
        })?;

        let session = self.establish(stream, options).await?;
        info!(host = %options.target(), "SSH connection established");

        Ok(SshClient { session, address })
    }

    async fn open_tunnel(
        &self,
        via: &SshClient,
        address: &str,
        port: u16,
    ) -> Result<(VirtualConnection, TunnelStream)> {
        let channel = via
            .session
            .handle
            .channel_open_direct_tcpip(address, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                error!(jump_host = %via.address, host = %address, error = %e, "Failed to open direct-tcpip channel");
                SshError::TunnelDial {
                    via: via.address.clone(),
                    address: format!("{}:{}", address, port),
                    reason: e.to_string(),
                }
            })?;

        Ok(split_tunnel(channel.into_stream(), format!("{}:{}", address, port)))
    }

    async fn handshake(&self, stream: TunnelStream, options: &ConnectionOptions) -> Result<HostConnection> {
        let session = self.establish(stream, options).await?;
        info!(host = %options.target(), "SSH connection established over tunnel");

        Ok(HostConnection {
            session,
            address: options.connection_string(),
        })
    }

    fn client_from_handshake(&self, handshake: &HostConnection) -> SshClient {
        SshClient {
            session: handshake.session.clone(),
            address: handshake.address.clone(),
        }
    }

    async fn open_session(&self, client: &SshClient, options: &ConnectionOptions) -> Result<ExecSession> {
        let channel = client.session.handle.channel_open_session().await.map_err(|e| {
            error!(host = %client.address, error = %e, "Failed to open SSH channel");
            SshError::session_open(options.connection_string(), e)
        })?;

        Ok(ExecSession {
            channel: Mutex::new(channel),
        })
    }

    async fn exec(&self, session: &mut ExecSession, options: &ConnectionOptions) -> Result<Vec<u8>> {
        let address = options.connection_string();
        let channel = session.channel.get_mut();

        channel
            .exec(true, options.command.as_str())
            .await
            .map_err(|e| SshError::execution(&address, e))?;

        let mut output = Vec::new();
        let mut exit_status = None;
        let mut exit_signal = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == EXTENDED_DATA_STDERR => {
                    output.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::ExitSignal {
                    signal_name,
                    error_message,
                    ..
                } => exit_signal = Some(format!("{:?} {}", signal_name, error_message)),
                ChannelMsg::Failure => {
                    return Err(SshError::execution(&address, "remote side refused exec request"))
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        match (exit_status, exit_signal) {
            (Some(0), _) => Ok(output),
            (Some(status), _) => {
                warn!(host = %address, exit_status = status, "Remote command exited with non-zero status");
                Err(SshError::exit_status(address, status))
            }
            (None, Some(signal)) => Err(SshError::execution(
                address,
                format!("process killed by signal {}", signal.trim()),
            )),
            (None, None) => Err(SshError::execution(
                address,
                "remote command exited without exit status or exit signal",
            )),
        }
    }
}

/// SSH 客户端会话处理器，负责主机密钥验证
pub struct ClientHandler {
    verification_mode: HostKeyVerification,
    known_hosts: Option<HashMap<String, String>>,
    host: String,
    port: u16,
    /// 随处理器一起释放，通知会话任务已退出
    session_alive: Option<watch::Sender<()>>,
}

impl ClientHandler {
    pub fn for_options(options: &ConnectionOptions) -> Self {
        Self {
            verification_mode: options.host_key_verification.clone(),
            known_hosts: options.known_hosts.clone(),
            host: options.address.clone(),
            port: options.port,
            session_alive: None,
        }
    }

    fn with_session_alive(mut self, alive: watch::Sender<()>) -> Self {
        self.session_alive = Some(alive);
        self
    }

    /// 按验证策略判断是否接受主机公钥
    pub fn verify(&self, fingerprint: &str) -> bool {
        let host_key = format!("{}:{}", self.host, self.port);
        let stored = self
            .known_hosts
            .as_ref()
            .and_then(|known_hosts| known_hosts.get(&host_key));

        match (&self.verification_mode, stored) {
            (HostKeyVerification::Disabled, _) => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    "Host key verification DISABLED - accepting all keys"
                );
                true
            }
            (_, Some(stored)) if stored == fingerprint => {
                debug!(host = %host_key, "Host key verified");
                true
            }
            (_, Some(stored)) => {
                error!(
                    host = %host_key,
                    expected = %stored,
                    actual = %fingerprint,
                    "Host key mismatch - REJECTING CONNECTION"
                );
                false
            }
            (HostKeyVerification::Accept, None) => {
                info!(
                    host = %host_key,
                    fingerprint = %fingerprint,
                    "Unknown host - accepting host key"
                );
                true
            }
            (HostKeyVerification::Strict, None) => {
                error!(host = %host_key, "Unknown host in strict mode - rejecting connection");
                false
            }
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.verify(&fingerprint(server_public_key)))
    }
}
