use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw message bytes plus the mailbox sequence number they came from.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub seq: u32,
    pub bytes: Vec<u8>,
}

/// Sequence-numbered access to a mailbox. Sequence numbers are 1-based,
/// assigned in arrival order; ranges are inclusive. New-mail notifications
/// arrive separately, on the channel fed by the watcher.
#[allow(async_fn_in_trait)]
pub trait MailSource {
    async fn total_messages(&self) -> Result<u32, MailError>;
    async fn fetch_range(&self, start: u32, end: u32) -> Result<Vec<RawMessage>, MailError>;
}

/// A drop directory of raw `.eml` files, ordered by file name. A delivery
/// agent appends files; the notify watcher reports them as new mail.
pub struct Maildir {
    dir: PathBuf,
}

impl Maildir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Maildir { dir: dir.into() }
    }

    fn list(&self) -> Result<Vec<PathBuf>, MailError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "eml"))
            .collect();
        files.sort();
        Ok(files)
    }
}

impl MailSource for Maildir {
    async fn total_messages(&self) -> Result<u32, MailError> {
        Ok(self.list()?.len() as u32)
    }

    async fn fetch_range(&self, start: u32, end: u32) -> Result<Vec<RawMessage>, MailError> {
        let files = self.list()?;
        let mut messages = Vec::new();
        for seq in start.max(1)..=end {
            let Some(path) = files.get(seq as usize - 1) else { break };
            match tokio::fs::read(path).await {
                Ok(bytes) => messages.push(RawMessage { seq, bytes }),
                Err(e) => warn!(path = %path.display(), "failed to read message: {e}"),
            }
        }
        Ok(messages)
    }
}

/// Watch the drop directory and report newly created message files on `tx`.
/// The returned watcher must be kept alive for watching to continue.
pub fn spawn_mail_watcher(
    dir: &Path,
    tx: mpsc::Sender<u32>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(ev) = event {
            if matches!(ev.kind, EventKind::Create(_)) {
                let new = ev
                    .paths
                    .iter()
                    .filter(|p| p.extension().is_some_and(|ext| ext == "eml"))
                    .count();
                if new > 0 {
                    let _ = tx.try_send(new as u32);
                }
            }
        }
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

// ── Static mailbox (used in tests) ───────────────────────────────────────────

/// Fixed in-memory mailbox; `deliver` appends a message the way new mail
/// would arrive.
#[derive(Default)]
pub struct StaticMailbox {
    messages: Mutex<Vec<Vec<u8>>>,
}

impl StaticMailbox {
    pub fn new(messages: Vec<Vec<u8>>) -> Self {
        StaticMailbox { messages: Mutex::new(messages) }
    }

    pub fn deliver(&self, bytes: Vec<u8>) {
        self.messages.lock().unwrap().push(bytes);
    }
}

impl MailSource for StaticMailbox {
    async fn total_messages(&self) -> Result<u32, MailError> {
        Ok(self.messages.lock().unwrap().len() as u32)
    }

    async fn fetch_range(&self, start: u32, end: u32) -> Result<Vec<RawMessage>, MailError> {
        let messages = self.messages.lock().unwrap();
        let mut out = Vec::new();
        for seq in start.max(1)..=end {
            if let Some(bytes) = messages.get(seq as usize - 1) {
                out.push(RawMessage { seq, bytes: bytes.clone() });
            }
        }
        Ok(out)
    }
}
