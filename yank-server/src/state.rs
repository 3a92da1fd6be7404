use std::sync::{Arc, Mutex};

use crate::clipboard::Clipboard;
use crate::config::Config;
use crate::limits::{ClipboardStats, VisitorTable};
use crate::tls;

/// Shared handle threaded through every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clipboard: Arc<Clipboard>,
    pub visitors: Arc<Mutex<VisitorTable>>,
    pub stats: Arc<Mutex<ClipboardStats>>,
    /// `sha256//<base64>` digest of the server certificate's public key,
    /// embedded in generated curl commands for pinning.
    pub pinned_pubkey: Arc<str>,
}

impl AppState {
    pub fn new(config: Config) -> std::io::Result<Self> {
        let clipboard = Clipboard::open(&config.clipboard_dir)?;

        let cert_pem = std::fs::read_to_string(&config.cert_file)?;
        let pinned_pubkey = tls::pinned_pubkey_digest(&cert_pem)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

        let visitors = VisitorTable::new(config.visitor_window, config.file_count_per_visitor_limit);

        Ok(AppState {
            config: Arc::new(config),
            clipboard: Arc::new(clipboard),
            visitors: Arc::new(Mutex::new(visitors)),
            stats: Arc::new(Mutex::new(ClipboardStats::default())),
            pinned_pubkey: pinned_pubkey.into(),
        })
    }

    /// Canonical HTTPS URL for an entry.
    pub fn entry_url(&self, id: &str) -> String {
        format!("{}/{}", self.config.base_url(), id)
    }

    /// Ready-to-run download command for an entry, pinning this server's
    /// public key so self-signed deployments verify end to end.
    pub fn curl_command(&self, id: &str) -> String {
        format!(
            "curl -sSLk --pinnedpubkey {} \"{}\"",
            self.pinned_pubkey,
            self.entry_url(id)
        )
    }

    pub fn stats_snapshot(&self) -> ClipboardStats {
        *self.stats.lock().expect("stats mutex poisoned")
    }

    pub fn publish_stats(&self, stats: ClipboardStats) {
        *self.stats.lock().expect("stats mutex poisoned") = stats;
    }
}
