//! SSH 命令执行模块
//! 直连或经跳板机隧道连接目标主机，执行单条命令并保证所有网络资源按序释放

pub mod client;
pub mod release;
pub mod session;
pub mod transport;
pub mod tunnel;

pub use client::{ClientHandler, RusshTransport, SshClient};
pub use release::{CleanupReport, CleanupWarning, Releasable, ResourceKind};
pub use session::{run_ssh_command, JumpHostSession, SshSession};
pub use transport::Transport;

use tracing::debug;

use crate::error::Result;
use infratest_common::{ConnectionOptions, Host};

/// 检查连通性时执行的空操作命令
pub const NO_OP_COMMAND: &str = "exit";

/// 执行空操作命令，检查能否连接并认证到目标主机
pub async fn check_connection<T: Transport>(transport: &T, options: &ConnectionOptions) -> Result<()> {
    let options = options.clone().with_command(NO_OP_COMMAND);
    run_ssh_command(transport, &options).await.map(|_| ())
}

/// 在目标主机上执行 `options.command`，返回合并后的 stdout/stderr
pub async fn run_command<T: Transport>(transport: &T, options: &ConnectionOptions) -> Result<Vec<u8>> {
    run_ssh_command(transport, options).await
}

/// 经跳板机在目标主机上执行命令
pub async fn run_command_via_jump_host<T: Transport>(
    transport: &T,
    jump_host: &ConnectionOptions,
    target: &ConnectionOptions,
    command: &str,
) -> Result<Vec<u8>> {
    debug!(
        jump_host = %jump_host.target(),
        host = %target.target(),
        "Running command through jump host"
    );
    let options = target
        .clone()
        .with_jump_host(jump_host.clone())
        .with_command(command);
    run_ssh_command(transport, &options).await
}

/// 检查能否通过 SSH 连接到主机
pub async fn check_ssh_connection(host: &Host) -> Result<()> {
    check_connection(&RusshTransport::default(), &host.connection_options(NO_OP_COMMAND)).await
}

/// 在主机上执行命令并返回输出
pub async fn check_ssh_command(host: &Host, command: &str) -> Result<String> {
    let output = run_command(&RusshTransport::default(), &host.connection_options(command)).await?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// 经公网主机（跳板机）连接私网主机并执行命令
///
/// 用于验证可以从堡垒机 SSH 到不可从公网访问的实例。
pub async fn check_private_ssh_connection(
    public_host: &Host,
    private_host: &Host,
    command: &str,
) -> Result<String> {
    let output = run_command_via_jump_host(
        &RusshTransport::default(),
        &public_host.connection_options(""),
        &private_host.connection_options(""),
        command,
    )
    .await?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}
