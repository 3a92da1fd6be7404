use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, Key};

/// Default HTTPS port when none is given.
pub const DEFAULT_PORT: u16 = 2486;
/// Length of server-generated clipboard ids.
pub const RANDOM_ID_LEN: usize = 10;

const DEFAULT_FILE_SIZE_LIMIT: u64 = 128 * 1024 * 1024;
const DEFAULT_CLIPBOARD_SIZE_LIMIT: u64 = 1024 * 1024 * 1024;
const DEFAULT_CLIPBOARD_COUNT_LIMIT: u64 = 500;
const DEFAULT_VISITOR_FILE_LIMIT: u64 = 50;
const DEFAULT_VISITOR_WINDOW: Duration = Duration::from_secs(60 * 60);
const DEFAULT_FILE_EXPIRE_AFTER: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_MANAGER_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "yankd")]
#[command(about = "Cross-machine clipboard server", long_about = None)]
pub struct Cli {
    /// HTTPS listen address
    #[arg(long, env = "YANKD_LISTEN_HTTPS", default_value = "0.0.0.0:2486")]
    pub listen_https: SocketAddr,

    /// Plain HTTP listen address; answers every request with a redirect to
    /// the HTTPS endpoint
    #[arg(long, env = "YANKD_LISTEN_HTTP")]
    pub listen_http: Option<SocketAddr>,

    /// Public host:port used in generated links and curl commands
    #[arg(long, env = "YANKD_SERVER_ADDR")]
    pub server_addr: Option<String>,

    /// Path to the TLS certificate (PEM); generated self-signed when absent
    #[arg(long, env = "YANKD_CERT_FILE")]
    pub cert_file: Option<PathBuf>,

    /// Path to the TLS private key (PEM)
    #[arg(long, env = "YANKD_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Directory holding clipboard payloads and metadata
    #[arg(long, env = "YANKD_CLIPBOARD_DIR", default_value = "/var/cache/yank")]
    pub clipboard_dir: PathBuf,

    /// Shared secret; when absent the instance is open to everyone
    #[arg(long, env = "YANKD_PASSWORD")]
    pub password: Option<String>,

    /// Base64 salt for key derivation; random when absent. Clients need the
    /// same salt (published via /info) to derive matching credentials.
    #[arg(long, env = "YANKD_SALT")]
    pub salt: Option<String>,

    /// Per-file size cap in bytes (0 = unlimited)
    #[arg(long, env = "YANKD_FILE_SIZE_LIMIT", default_value_t = DEFAULT_FILE_SIZE_LIMIT)]
    pub file_size_limit: u64,

    /// Aggregate clipboard size cap in bytes (0 = unlimited)
    #[arg(long, env = "YANKD_CLIPBOARD_SIZE_LIMIT", default_value_t = DEFAULT_CLIPBOARD_SIZE_LIMIT)]
    pub clipboard_size_limit: u64,

    /// Aggregate clipboard entry count cap (0 = unlimited)
    #[arg(long, env = "YANKD_CLIPBOARD_COUNT_LIMIT", default_value_t = DEFAULT_CLIPBOARD_COUNT_LIMIT)]
    pub clipboard_count_limit: u64,

    /// Uploads allowed per visitor inside the sliding window (0 = unlimited)
    #[arg(long, env = "YANKD_VISITOR_FILE_LIMIT", default_value_t = DEFAULT_VISITOR_FILE_LIMIT)]
    pub visitor_file_limit: u64,

    /// Sliding window for the per-visitor upload cap, e.g. "1h"
    #[arg(long, env = "YANKD_VISITOR_WINDOW", default_value = "1h")]
    pub visitor_window: String,

    /// Default and maximum entry lifetime, e.g. "7d" (0 = entries never expire)
    #[arg(long, env = "YANKD_EXPIRE_AFTER", default_value = "7d")]
    pub expire_after: String,

    /// Comma-separated allowed file modes, first entry is the default
    #[arg(long, env = "YANKD_FILE_MODES", default_value = "rw,ro")]
    pub file_modes: String,

    /// Interval between expiry/stats passes, e.g. "30s"
    #[arg(long, env = "YANKD_MANAGER_INTERVAL", default_value = "30s")]
    pub manager_interval: String,

    /// Overall per-request timeout, e.g. "60s" (0 = disabled)
    #[arg(long, env = "YANKD_REQUEST_TIMEOUT", default_value = "0s")]
    pub request_timeout: String,

    /// How long a streaming producer/consumer waits for its peer
    #[arg(long, env = "YANKD_RENDEZVOUS_TIMEOUT", default_value = "30s")]
    pub rendezvous_timeout: String,

    /// Trusted forwarded-IP header (e.g. "X-Forwarded-For") when running
    /// behind a reverse proxy; visitor limits key on the transport address
    /// otherwise
    #[arg(long, env = "YANKD_PROXY_HEADER")]
    pub proxy_header: Option<String>,
}

/// Entry access mode. `ro` entries cannot be replaced before they expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMode {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl FileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileMode::ReadOnly => "ro",
            FileMode::ReadWrite => "rw",
        }
    }
}

impl FromStr for FileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ro" => Ok(FileMode::ReadOnly),
            "rw" => Ok(FileMode::ReadWrite),
            other => Err(format!("unknown file mode: {other}")),
        }
    }
}

/// Everything the core consumes. Built by the `yankd` binary from flags and
/// environment; tests construct it directly.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_https: SocketAddr,
    pub listen_http: Option<SocketAddr>,
    /// Public `host:port` used in generated URLs.
    pub server_addr: String,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub clipboard_dir: PathBuf,
    /// Shared secret; `None` means the instance is unauthenticated.
    pub key: Option<Key>,
    pub file_size_limit: u64,
    pub clipboard_size_limit: u64,
    pub clipboard_count_limit: u64,
    pub file_count_per_visitor_limit: u64,
    pub visitor_window: Duration,
    /// Default and maximum TTL; zero means entries never expire.
    pub file_expire_after: Duration,
    /// Allowed modes, first entry is the default for uploads.
    pub file_modes_allowed: Vec<FileMode>,
    pub manager_interval: Duration,
    /// Zero disables the overall request timeout.
    pub request_timeout: Duration,
    pub rendezvous_timeout: Duration,
    pub trusted_proxy_header: Option<String>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, String> {
        let server_addr = match cli.server_addr {
            Some(addr) => addr,
            None => cli.listen_https.to_string(),
        };

        let (cert_file, key_file) = match (cli.cert_file, cli.key_file) {
            (Some(cert), Some(key)) => (cert, key),
            (None, None) => {
                let dir = cli.clipboard_dir.join(".tls");
                (dir.join("cert.pem"), dir.join("key.pem"))
            }
            _ => return Err("cert-file and key-file must be given together".into()),
        };

        let key = match cli.password {
            Some(password) => {
                let key = match cli.salt {
                    Some(salt_b64) => {
                        let salt = BASE64
                            .decode(salt_b64.as_bytes())
                            .map_err(|e| format!("invalid salt: {e}"))?;
                        crypto::derive_key(password.as_bytes(), &salt)
                    }
                    None => crypto::derive_key_with_random_salt(password.as_bytes()),
                };
                Some(key)
            }
            None => None,
        };

        let mut file_modes_allowed = Vec::new();
        for mode in cli.file_modes.split(',') {
            let mode = mode.trim();
            if mode.is_empty() {
                continue;
            }
            file_modes_allowed.push(mode.parse::<FileMode>()?);
        }

        let config = Config {
            listen_https: cli.listen_https,
            listen_http: cli.listen_http,
            server_addr,
            cert_file,
            key_file,
            clipboard_dir: cli.clipboard_dir,
            key,
            file_size_limit: cli.file_size_limit,
            clipboard_size_limit: cli.clipboard_size_limit,
            clipboard_count_limit: cli.clipboard_count_limit,
            file_count_per_visitor_limit: cli.visitor_file_limit,
            visitor_window: parse_duration("visitor-window", &cli.visitor_window)?,
            file_expire_after: parse_duration("expire-after", &cli.expire_after)?,
            file_modes_allowed,
            manager_interval: parse_duration("manager-interval", &cli.manager_interval)?,
            request_timeout: parse_duration("request-timeout", &cli.request_timeout)?,
            rendezvous_timeout: parse_duration("rendezvous-timeout", &cli.rendezvous_timeout)?,
            trusted_proxy_header: cli.proxy_header,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server_addr.is_empty() {
            return Err("server-addr must not be empty".into());
        }
        if self.file_modes_allowed.is_empty() {
            return Err("at least one file mode must be allowed".into());
        }
        if self.manager_interval.is_zero() {
            return Err("manager-interval must be positive".into());
        }
        if self.rendezvous_timeout.is_zero() {
            return Err("rendezvous-timeout must be positive".into());
        }
        Ok(())
    }

    /// The default mode applied to uploads that do not name one.
    pub fn default_file_mode(&self) -> FileMode {
        self.file_modes_allowed[0]
    }

    pub fn mode_allowed(&self, mode: FileMode) -> bool {
        self.file_modes_allowed.contains(&mode)
    }

    /// Canonical HTTPS base URL of this instance, without trailing slash.
    pub fn base_url(&self) -> String {
        format!("https://{}", self.server_addr)
    }
}

/// Test-friendly defaults; the binary always goes through [`Config::from_cli`].
impl Default for Config {
    fn default() -> Self {
        Config {
            listen_https: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            listen_http: None,
            server_addr: format!("localhost:{DEFAULT_PORT}"),
            cert_file: PathBuf::from("cert.pem"),
            key_file: PathBuf::from("key.pem"),
            clipboard_dir: PathBuf::from("/var/cache/yank"),
            key: None,
            file_size_limit: DEFAULT_FILE_SIZE_LIMIT,
            clipboard_size_limit: DEFAULT_CLIPBOARD_SIZE_LIMIT,
            clipboard_count_limit: DEFAULT_CLIPBOARD_COUNT_LIMIT,
            file_count_per_visitor_limit: DEFAULT_VISITOR_FILE_LIMIT,
            visitor_window: DEFAULT_VISITOR_WINDOW,
            file_expire_after: DEFAULT_FILE_EXPIRE_AFTER,
            file_modes_allowed: vec![FileMode::ReadWrite, FileMode::ReadOnly],
            manager_interval: DEFAULT_MANAGER_INTERVAL,
            request_timeout: Duration::ZERO,
            rendezvous_timeout: DEFAULT_RENDEZVOUS_TIMEOUT,
            trusted_proxy_header: None,
        }
    }
}

/// Split a `host[:port]` string, tolerating bracketed IPv6 literals. The
/// host half keeps its brackets so it can be pasted back into a URL.
pub fn split_host_port(value: &str) -> (&str, Option<u16>) {
    if let Some(rest) = value.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &value[..end + 2];
            let port = value[end + 2..].strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match value.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (value, None),
        },
        None => (value, None),
    }
}

fn parse_duration(flag: &str, value: &str) -> Result<Duration, String> {
    if value == "0" || value == "0s" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(value).map_err(|e| format!("invalid {flag}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("yankd").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_cli(cli(&[])).unwrap();
        assert_eq!(config.file_expire_after, DEFAULT_FILE_EXPIRE_AFTER);
        assert_eq!(config.default_file_mode(), FileMode::ReadWrite);
        assert!(config.key.is_none());
    }

    #[test]
    fn server_addr_falls_back_to_listen_addr() {
        let config = Config::from_cli(cli(&["--listen-https", "127.0.0.1:9999"])).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:9999");
    }

    #[test]
    fn password_with_salt_derives_stable_key() {
        let salt = BASE64.encode(b"some salt");
        let a = Config::from_cli(cli(&["--password", "pw", "--salt", &salt])).unwrap();
        let b = Config::from_cli(cli(&["--password", "pw", "--salt", &salt])).unwrap();
        assert_eq!(a.key.unwrap().bytes, b.key.unwrap().bytes);
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Config::from_cli(cli(&["--file-modes", "rw,append"])).is_err());
    }

    #[test]
    fn rejects_lone_cert_file() {
        assert!(Config::from_cli(cli(&["--cert-file", "/tmp/cert.pem"])).is_err());
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("localhost"), ("localhost", None));
        assert_eq!(split_host_port("localhost:12345"), ("localhost", Some(12345)));
        assert_eq!(split_host_port("[::1]"), ("[::1]", None));
        assert_eq!(split_host_port("[::1]:2486"), ("[::1]", Some(2486)));
        // A non-numeric suffix is part of the host, not a port.
        assert_eq!(split_host_port("host:notaport"), ("host:notaport", None));
    }

    #[test]
    fn mode_round_trips_through_serde() {
        let json = serde_json::to_string(&FileMode::ReadOnly).unwrap();
        assert_eq!(json, "\"ro\"");
        let mode: FileMode = serde_json::from_str("\"rw\"").unwrap();
        assert_eq!(mode, FileMode::ReadWrite);
    }
}
