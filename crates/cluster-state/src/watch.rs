//! State directory watcher
//!
//! Turns raw file system notifications on the state directory into typed
//! [`StateEvent`]s. Classification only looks at file names; what an event
//! means for API clients is decided by the consumer.

use crate::{
    error::Result,
    models::{ClusterIdentity, Status, parse_record_name},
};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Change to a cluster record observed on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    /// A new record appeared in the Creating status
    Created {
        /// Cluster identity
        identity: ClusterIdentity,
        /// Status encoded in the file name
        status: Status,
    },
    /// An existing record changed status or content
    Changed {
        /// Cluster identity
        identity: ClusterIdentity,
        /// Status encoded in the file name
        status: Status,
    },
    /// The last file of a record was removed
    Removed {
        /// Cluster identity
        identity: ClusterIdentity,
    },
}

/// File-level change reported by the file system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawChange {
    /// File created or renamed into the directory
    Appeared,
    /// File removed or renamed away
    Removed,
    /// File content rewritten in place
    Modified,
}

/// Classify one raw change.
///
/// `remaining` tells whether any other file of the same identity is still
/// present. A removal with a remaining sibling is the tail of a status rename
/// that was already reported when the new file appeared.
pub fn classify(change: RawChange, file_name: &str, remaining: bool) -> Option<StateEvent> {
    let (identity, status) = parse_record_name(file_name)?;
    match change {
        RawChange::Appeared if status == Status::Creating => {
            Some(StateEvent::Created { identity, status })
        }
        RawChange::Appeared | RawChange::Modified => Some(StateEvent::Changed { identity, status }),
        RawChange::Removed if remaining => None,
        RawChange::Removed => Some(StateEvent::Removed { identity }),
    }
}

fn raw_changes(event: &Event) -> Vec<(RawChange, &Path)> {
    let paths = &event.paths;
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .iter()
            .map(|p| (RawChange::Appeared, p.as_path()))
            .collect(),
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .iter()
            .map(|p| (RawChange::Removed, p.as_path()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => vec![
            (RawChange::Removed, paths[0].as_path()),
            (RawChange::Appeared, paths[1].as_path()),
        ],
        EventKind::Modify(ModifyKind::Data(_)) => paths
            .iter()
            .map(|p| (RawChange::Modified, p.as_path()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Whether `dir` still holds a record file for `identity`
fn has_record(dir: &Path, identity: &ClusterIdentity) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry
            .file_name()
            .to_str()
            .and_then(parse_record_name)
            .is_some_and(|(id, _)| &id == identity)
    })
}

/// Watches a state directory until dropped
pub struct StateWatcher {
    _watcher: RecommendedWatcher,
    events: async_channel::Receiver<StateEvent>,
}

impl StateWatcher {
    /// Start watching `dir`
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir: PathBuf = dir.as_ref().to_path_buf();
        let (tx, rx) = async_channel::unbounded();
        let watch_dir = dir.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("State directory watch error: {}", e);
                    return;
                }
            };
            for (change, path) in raw_changes(&event) {
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let remaining = change == RawChange::Removed
                    && parse_record_name(file_name)
                        .is_some_and(|(identity, _)| has_record(&watch_dir, &identity));
                if let Some(state_event) = classify(change, file_name, remaining) {
                    debug!("State event: {:?}", state_event);
                    // Receiver gone means nobody is watching any more
                    let _ = tx.try_send(state_event);
                }
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!("Watching state directory {:?}", dir);

        Ok(Self {
            _watcher: watcher,
            events: rx,
        })
    }

    /// Next event, or `None` once the watcher has shut down
    pub async fn recv(&self) -> Option<StateEvent> {
        self.events.recv().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ClusterIdentity {
        ClusterIdentity::new(name, "", "demo")
    }

    #[test]
    fn test_classify_creation() {
        assert_eq!(
            classify(RawChange::Appeared, "dev..demo_Creating", false),
            Some(StateEvent::Created {
                identity: id("dev"),
                status: Status::Creating
            })
        );
        assert_eq!(
            classify(RawChange::Appeared, "dev..demo_Running", true),
            Some(StateEvent::Changed {
                identity: id("dev"),
                status: Status::Running
            })
        );
        assert_eq!(
            classify(RawChange::Appeared, "dev..demo_Join", true),
            Some(StateEvent::Changed {
                identity: id("dev"),
                status: Status::Join
            })
        );
    }

    #[test]
    fn test_classify_removal() {
        // status rename: the new file already produced a change
        assert_eq!(classify(RawChange::Removed, "dev..demo_Creating", true), None);
        assert_eq!(classify(RawChange::Removed, "dev..demo_Join", true), None);
        assert_eq!(
            classify(RawChange::Removed, "dev..demo_Running", false),
            Some(StateEvent::Removed { identity: id("dev") })
        );
        assert_eq!(
            classify(RawChange::Removed, "dev..demo_Failed", false),
            Some(StateEvent::Removed { identity: id("dev") })
        );
    }

    #[test]
    fn test_classify_ignores_other_files() {
        assert_eq!(
            classify(RawChange::Appeared, ".dev..demo.1234.tmp", false),
            None
        );
        assert_eq!(classify(RawChange::Modified, "config.yaml", false), None);
        assert_eq!(
            classify(RawChange::Modified, "dev..demo_Running", false),
            Some(StateEvent::Changed {
                identity: id("dev"),
                status: Status::Running
            })
        );
    }
}
