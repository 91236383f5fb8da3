use serde::{Deserialize, Serialize};

use crate::types::{ChannelAddress, Cid};

/// Back-reference from a file to the message that introduced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    pub channel_address: ChannelAddress,
}

/// Metadata announced for a hosted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Local path once the bytes are on disk; `None` on remote replicas
    /// until the download completes.
    #[serde(default)]
    pub path: Option<String>,
    pub name: String,
    pub ext: String,
    pub cid: Cid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageRef>,
}

impl FileMetadata {
    pub fn new(cid: Cid, name: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            path: None,
            name: name.into(),
            ext: ext.into(),
            cid,
            size: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: MessageRef) -> Self {
        self.message = Some(message);
        self
    }

    /// File name with extension, safe to use as a single path component.
    pub fn file_name(&self) -> String {
        let ext = self.ext.trim_start_matches('.');
        let base = sanitize(&self.name);
        if ext.is_empty() {
            base
        } else {
            format!("{base}.{}", sanitize(ext))
        }
    }
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => cleaned,
    }
}

/// Bytes handed to the upload operation.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub name: String,
    pub ext: String,
    pub bytes: Vec<u8>,
}

impl FileContent {
    pub fn new(name: impl Into<String>, ext: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            ext: ext.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadPhase {
    Pending,
    Downloading,
    Completed,
    Canceled,
    /// Fetched bytes did not hash to the declared content id.
    Malicious,
}

impl DownloadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadPhase::Completed | DownloadPhase::Canceled | DownloadPhase::Malicious
        )
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, DownloadPhase::Pending | DownloadPhase::Downloading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub size: Option<u64>,
}

/// Tracking entry for one content id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStatus {
    pub cid: Cid,
    pub phase: DownloadPhase,
    pub progress: Option<DownloadProgress>,
}

impl DownloadStatus {
    pub fn new(cid: Cid, phase: DownloadPhase) -> Self {
        Self {
            cid,
            phase,
            progress: None,
        }
    }
}
