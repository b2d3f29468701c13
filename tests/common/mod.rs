//! 测试公共模块
//! 提供可记录调用顺序、可注入失败的模拟传输层，以及进程内 SSH 服务器（`server`）

#![allow(dead_code)]

pub mod server;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use infratest_ssh::error::{CloseError, Result, SshError};
use infratest_ssh::ssh::{Releasable, ResourceKind, Transport};
use infratest_ssh::{ConnectionOptions, SshAuth};

/// 可注入失败的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    DialJumpHost,
    DialHost,
    Tunnel,
    Handshake,
    Session,
    Exec,
}

/// 模拟传输记录的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened(ResourceKind),
    Released(ResourceKind),
}

type EventLog = Arc<Mutex<Vec<Event>>>;

/// 模拟资源，释放时记录事件并返回预设结果
pub struct MockResource {
    pub kind: ResourceKind,
    pub address: String,
    log: EventLog,
    close_error: Option<CloseError>,
}

#[async_trait]
impl Releasable for MockResource {
    async fn release(&self) -> std::result::Result<(), CloseError> {
        self.log.lock().unwrap().push(Event::Released(self.kind));
        match &self.close_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// 隧道字节流，记录它通往的地址
pub struct MockStream {
    pub address: String,
}

/// 模拟传输
///
/// 地址登记在 `jump_hosts` 中的拨号视为跳板机连接。命令输出由一个极简的假 shell 生成：
/// `echo <text>` 回显文本，`whoami` 输出用户名，`hostname` 输出执行所在的主机地址。
#[derive(Default)]
pub struct MockTransport {
    log: EventLog,
    calls: AtomicUsize,
    jump_hosts: HashSet<String>,
    fail_at: Option<Phase>,
    hang_at: Option<Phase>,
    close_errors: HashMap<ResourceKind, CloseError>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jump_host(mut self, address: &str) -> Self {
        self.jump_hosts.insert(address.to_string());
        self
    }

    pub fn failing_at(mut self, phase: Phase) -> Self {
        self.fail_at = Some(phase);
        self
    }

    /// 在指定阶段永不返回，用于模拟外部超时放弃调用
    pub fn hanging_at(mut self, phase: Phase) -> Self {
        self.hang_at = Some(phase);
        self
    }

    pub fn with_close_error(mut self, kind: ResourceKind, error: CloseError) -> Self {
        self.close_errors.insert(kind, error);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<ResourceKind> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Opened(kind) => Some(kind),
                Event::Released(_) => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<ResourceKind> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Released(kind) => Some(kind),
                Event::Opened(_) => None,
            })
            .collect()
    }

    /// 传输层方法被调用的总次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    async fn enter(&self, phase: Phase) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_at == Some(phase) {
            std::future::pending::<()>().await;
        }
        self.fail_at == Some(phase)
    }

    fn open(&self, kind: ResourceKind, address: impl Into<String>) -> MockResource {
        self.log.lock().unwrap().push(Event::Opened(kind));
        MockResource {
            kind,
            address: address.into(),
            log: self.log.clone(),
            close_error: self.close_errors.get(&kind).cloned(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Client = MockResource;
    type Tunnel = MockResource;
    type Stream = MockStream;
    type Handshake = MockResource;
    type Session = MockResource;

    async fn dial(&self, options: &ConnectionOptions) -> Result<MockResource> {
        let address = options.connection_string();
        let (phase, kind) = if self.jump_hosts.contains(&options.address) {
            (Phase::DialJumpHost, ResourceKind::JumpHostClient)
        } else {
            (Phase::DialHost, ResourceKind::Client)
        };

        if self.enter(phase).await {
            return Err(SshError::dial(address, "connection refused"));
        }
        Ok(self.open(kind, address))
    }

    async fn open_tunnel(
        &self,
        via: &MockResource,
        address: &str,
        port: u16,
    ) -> Result<(MockResource, MockStream)> {
        let target = format!("{}:{}", address, port);
        if self.enter(Phase::Tunnel).await {
            return Err(SshError::TunnelDial {
                via: via.address.clone(),
                address: target,
                reason: "administratively prohibited".to_string(),
            });
        }
        Ok((
            self.open(ResourceKind::HostVirtualConnection, target.clone()),
            MockStream { address: target },
        ))
    }

    async fn handshake(&self, stream: MockStream, options: &ConnectionOptions) -> Result<MockResource> {
        if self.enter(Phase::Handshake).await {
            return Err(SshError::handshake(stream.address, "ssh: handshake failed: EOF"));
        }
        Ok(self.open(ResourceKind::HostConnection, options.connection_string()))
    }

    fn client_from_handshake(&self, handshake: &MockResource) -> MockResource {
        self.open(ResourceKind::Client, handshake.address.clone())
    }

    async fn open_session(&self, client: &MockResource, options: &ConnectionOptions) -> Result<MockResource> {
        if self.enter(Phase::Session).await {
            return Err(SshError::session_open(options.connection_string(), "channel open failed"));
        }
        Ok(self.open(ResourceKind::Session, client.address.clone()))
    }

    async fn exec(&self, session: &mut MockResource, options: &ConnectionOptions) -> Result<Vec<u8>> {
        if self.enter(Phase::Exec).await {
            return Err(SshError::exit_status(options.connection_string(), 1));
        }

        let command = options.command.trim();
        let output = if let Some(text) = command.strip_prefix("echo ") {
            format!("{}\n", text)
        } else if command == "whoami" {
            format!("{}\n", options.username)
        } else if command == "hostname" {
            format!("{}\n", session.address)
        } else {
            String::new()
        };
        Ok(output.into_bytes())
    }
}

/// 创建带私钥认证的连接描述
pub fn key_options(username: &str, address: &str, port: u16) -> ConnectionOptions {
    ConnectionOptions::new(username, address, port).with_auth(SshAuth::private_key("TEST KEY"))
}
