//! Common types shared between the SSH execution core and the CLI

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub mod error;
pub mod ssh;

pub use error::OptionsError;
pub use ssh::{ConnectionOptions, Host, HostKeyVerification, KeyPair, SshAuth};
