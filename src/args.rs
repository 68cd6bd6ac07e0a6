use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::policy::Policy;

#[derive(Parser, Debug)]
pub struct Args {
    /// Whether securenotes' clients connect to it over https.
    /// If so, the sessionid cookie is sent as a secure cookie.
    #[arg(short, long)]
    secure: bool,

    /// The address securenotes should listen on. By default
    /// securenotes will listen just on the IPv4 loopback.
    #[arg(short, long)]
    address: Option<String>,

    /// The port securenotes listens on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Where accounts and notes are stored.
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Minimum number of characters in a password.
    #[arg(long, default_value_t = 6)]
    min_password_len: usize,

    /// Treat emails differing only in case as the same account.
    #[arg(long)]
    email_case_insensitive: bool,

    /// Allow usernames differing only in case.
    #[arg(long)]
    username_case_sensitive: bool,

    /// Create the demo accounts (john@example.com, jane@example.com) if
    /// there are no users yet.
    #[arg(long)]
    demo_data: bool,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn demo_data(&self) -> bool {
        self.demo_data
    }

    pub fn policy(&self) -> Policy {
        Policy {
            min_password_len: self.min_password_len,
            email_case_insensitive: self.email_case_insensitive,
            username_case_insensitive: !self.username_case_sensitive,
        }
    }
}
