use hearth_shared::types::Cid;
use hearth_shared::DownloadStatus;
use hearth_store::StoreEvent;

/// Change notifications for collaborators (UI state layer, tooling).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A replicated collection changed.
    Store(StoreEvent),
    DownloadStatus(DownloadStatus),
    DownloadStatusRemoved(Cid),
}
