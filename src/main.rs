//! infratest-ssh 命令行入口
//! 检查主机连通性，或在主机上（可经跳板机）执行单条命令

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use infratest_ssh::config::AppConfig;
use infratest_ssh::ssh::{self, RusshTransport};
use infratest_ssh::{telemetry, ConnectionOptions, SshAuth};

#[derive(Parser)]
#[command(name = "infratest-ssh")]
#[command(version, about = "Run commands on provisioned hosts over SSH", long_about = None)]
struct Cli {
    /// 整个操作的超时时间（秒），超时后放弃调用
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the host accepts an SSH connection
    Check {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Run a command on the host and print its combined output
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Command line to execute
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Run a command on a private host through a jump host
    RunVia {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        jump: JumpArgs,

        /// Command line to execute
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Target host address
    #[arg(long)]
    host: String,

    /// SSH user (defaults to INFRATEST_SSH__DEFAULT_USERNAME)
    #[arg(long)]
    user: Option<String>,

    /// SSH port (defaults to INFRATEST_SSH__DEFAULT_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Private key file
    #[arg(long)]
    key: Option<PathBuf>,

    /// Environment variable holding the SSH password
    #[arg(long)]
    password_env: Option<String>,
}

#[derive(Args)]
struct JumpArgs {
    /// Jump host address
    #[arg(long)]
    jump_host: String,

    /// Jump host SSH user (defaults to the target user)
    #[arg(long)]
    jump_user: Option<String>,

    #[arg(long)]
    jump_port: Option<u16>,

    /// Jump host private key file (defaults to the target key)
    #[arg(long)]
    jump_key: Option<PathBuf>,
}

/// 按命令行参数与配置默认值构建连接描述
fn connection_options(
    config: &AppConfig,
    host: &str,
    user: Option<&str>,
    port: Option<u16>,
    key: Option<&PathBuf>,
    password_env: Option<&str>,
) -> anyhow::Result<ConnectionOptions> {
    let mut options = ConnectionOptions::new(
        user.unwrap_or(&config.ssh.default_username),
        host,
        port.unwrap_or(config.ssh.default_port),
    )
    .with_connect_timeout(config.ssh.connect_timeout_secs)
    .with_host_key_verification(config.ssh.host_key_verification()?);

    if let Some(path) = key {
        let private_key = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read private key {}", path.display()))?;
        options = options.with_auth(SshAuth::private_key(private_key));
    }

    if let Some(var) = password_env {
        let password = std::env::var(var)
            .with_context(|| format!("Environment variable {} is not set", var))?;
        options = options.with_auth(SshAuth::password(password));
    }

    Ok(options)
}

impl TargetArgs {
    fn options(&self, config: &AppConfig) -> anyhow::Result<ConnectionOptions> {
        connection_options(
            config,
            &self.host,
            self.user.as_deref(),
            self.port,
            self.key.as_ref(),
            self.password_env.as_deref(),
        )
    }
}

impl JumpArgs {
    fn options(&self, config: &AppConfig, target: &TargetArgs) -> anyhow::Result<ConnectionOptions> {
        connection_options(
            config,
            &self.jump_host,
            self.jump_user.as_deref().or(target.user.as_deref()),
            self.jump_port,
            self.jump_key.as_ref().or(target.key.as_ref()),
            target.password_env.as_deref(),
        )
    }
}

async fn execute(config: &AppConfig, command: &Commands) -> anyhow::Result<Option<Vec<u8>>> {
    let transport = RusshTransport::default();

    match command {
        Commands::Check { target } => {
            let options = target.options(config)?;
            ssh::check_connection(&transport, &options).await?;
            tracing::info!(host = %options.connection_string(), "SSH connection check passed");
            Ok(None)
        }
        Commands::Run { target, command } => {
            let options = target.options(config)?.with_command(command.join(" "));
            Ok(Some(ssh::run_command(&transport, &options).await?))
        }
        Commands::RunVia {
            target,
            jump,
            command,
        } => {
            let target_options = target.options(config)?;
            let jump_options = jump.options(config, target)?;
            let output = ssh::run_command_via_jump_host(
                &transport,
                &jump_options,
                &target_options,
                &command.join(" "),
            )
            .await?;
            Ok(Some(output))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 加载 .env 文件（开发环境）
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        common_version = infratest_common::version(),
        "infratest-ssh starting"
    );

    // 3. 执行，可选地由外部超时放弃
    let output = match cli.timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), execute(&config, &cli.command))
            .await
            .with_context(|| format!("Operation timed out after {}s", secs))??,
        None => execute(&config, &cli.command).await?,
    };

    if let Some(output) = output {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&output)?;
        stdout.flush()?;
    }

    Ok(())
}
