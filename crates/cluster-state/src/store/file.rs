//! File-backed state store
//!
//! Each cluster is one YAML file named `{identity}_{Status}` inside the state
//! directory. Writes go to a dot-prefixed temporary file that is then moved
//! into place, so a reader sees either the old record or the new one.

use super::StateStore;
use crate::{
    error::{Error, Result},
    models::{ClusterIdentity, ClusterState, Status, parse_record_name},
};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// State store keeping one file per cluster
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        async_fs::create_dir_all(&dir).await?;
        debug!("Using state directory {:?}", dir);
        Ok(Self { dir })
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every record file in the directory, keyed by identity
    async fn scan(&self) -> Result<HashMap<ClusterIdentity, Vec<(PathBuf, Status)>>> {
        let mut found: HashMap<ClusterIdentity, Vec<(PathBuf, Status)>> = HashMap::new();
        let mut entries = async_fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.try_next().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some((identity, status)) = parse_record_name(name) {
                found
                    .entry(identity)
                    .or_default()
                    .push((entry.path(), status));
            }
        }
        Ok(found)
    }

    async fn files_of(&self, identity: &ClusterIdentity) -> Result<Vec<(PathBuf, Status)>> {
        Ok(self.scan().await?.remove(identity).unwrap_or_default())
    }

    async fn read(path: &Path) -> Result<ClusterState> {
        let content = async_fs::read_to_string(path).await?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Read every file of one identity and keep the most recently updated.
    ///
    /// Two files of the same identity exist only for the moment between a
    /// status rename and the removal of the old file.
    async fn read_newest(files: &[(PathBuf, Status)]) -> Result<Option<ClusterState>> {
        let mut newest: Option<ClusterState> = None;
        for (path, _) in files {
            let state = match Self::read(path).await {
                Ok(state) => state,
                // removed by a concurrent writer
                Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => continue,
                Err(Error::Yaml(e)) => {
                    warn!("Skipping unreadable state file {:?}: {}", path, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if newest
                .as_ref()
                .is_none_or(|current| state.updated_at > current.updated_at)
            {
                newest = Some(state);
            }
        }
        Ok(newest)
    }

    async fn write_temp(&self, state: &ClusterState) -> Result<PathBuf> {
        let content = serde_yaml::to_string(state)?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", state.id(), Uuid::new_v4()));
        async_fs::write(&tmp, content).await?;
        Ok(tmp)
    }

    async fn remove_stale(&self, state: &ClusterState, files: Vec<(PathBuf, Status)>) {
        for (path, status) in files {
            if status.suffix() == state.status.suffix() {
                continue;
            }
            debug!("Removing stale state file {:?}", path);
            if let Err(e) = async_fs::remove_file(&path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove stale state file {:?}: {}", path, e);
                }
            }
        }
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn create(&self, state: &ClusterState) -> Result<()> {
        if !self.files_of(&state.identity).await?.is_empty() {
            return Err(Error::Conflict(state.id()));
        }

        let tmp = self.write_temp(state).await?;
        let target = self.dir.join(state.record_name());
        // hard_link refuses an existing target, which makes the create exclusive
        let linked = async_fs::hard_link(&tmp, &target).await;
        async_fs::remove_file(&tmp).await?;
        match linked {
            Ok(()) => {
                debug!("Created state record {:?}", target);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Error::Conflict(state.id())),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &ClusterState) -> Result<()> {
        let tmp = self.write_temp(state).await?;
        let target = self.dir.join(state.record_name());
        if let Err(e) = async_fs::rename(&tmp, &target).await {
            let _ = async_fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Saved state record {:?}", target);

        let files = self.files_of(&state.identity).await?;
        self.remove_stale(state, files).await;
        Ok(())
    }

    async fn get(&self, identity: &ClusterIdentity) -> Result<ClusterState> {
        let files = self.files_of(identity).await?;
        Self::read_newest(&files)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn list(&self) -> Result<Vec<ClusterState>> {
        let mut states = Vec::new();
        for (_, files) in self.scan().await? {
            if let Some(state) = Self::read_newest(&files).await? {
                states.push(state);
            }
        }
        Ok(states)
    }

    async fn delete(&self, identity: &ClusterIdentity, force: bool) -> Result<()> {
        let files = self.files_of(identity).await?;
        if files.is_empty() {
            return if force {
                Ok(())
            } else {
                Err(Error::NotFound(identity.to_string()))
            };
        }
        for (path, _) in files {
            match async_fs::remove_file(&path).await {
                Ok(()) => debug!("Removed state file {:?}", path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClusterDescriptor;
    use tempfile::tempdir;

    fn running(name: &str) -> ClusterState {
        ClusterState::new(ClusterDescriptor::new(name, "demo"), Status::Running)
    }

    async fn file_names(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = async_fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.try_next().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
    }

    #[smol_potat::test]
    async fn test_status_change_renames_record() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let mut state = ClusterState::new(ClusterDescriptor::new("dev", "demo"), Status::Creating);
        store.create(&state).await.unwrap();
        assert_eq!(file_names(dir.path()).await, vec!["dev..demo_Creating"]);

        state.set_status(Status::Running);
        store.save(&state).await.unwrap();
        assert_eq!(file_names(dir.path()).await, vec!["dev..demo_Running"]);

        let loaded = store.get(&state.identity).await.unwrap();
        assert_eq!(loaded.status, Status::Running);
    }

    #[smol_potat::test]
    async fn test_create_conflicts_with_any_status() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let mut state = running("dev");
        state.set_status(Status::Failed);
        store.save(&state).await.unwrap();

        let again = ClusterState::new(ClusterDescriptor::new("dev", "demo"), Status::Creating);
        assert!(matches!(store.create(&again).await, Err(Error::Conflict(_))));
        assert_eq!(store.get(&state.identity).await.unwrap().status, Status::Failed);
    }

    #[smol_potat::test]
    async fn test_newest_file_wins_when_both_present() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let mut old = running("dev");
        old.set_status(Status::Join);
        let mut new = old.clone();
        new.set_status(Status::Running);

        async_fs::write(
            dir.path().join(old.record_name()),
            serde_yaml::to_string(&old).unwrap(),
        )
        .await
        .unwrap();
        async_fs::write(
            dir.path().join(new.record_name()),
            serde_yaml::to_string(&new).unwrap(),
        )
        .await
        .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, Status::Running);
    }

    #[smol_potat::test]
    async fn test_garbage_files_are_skipped() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        store.save(&running("dev")).await.unwrap();

        async_fs::write(dir.path().join("broken..demo_Running"), "{ not yaml: [")
            .await
            .unwrap();
        async_fs::write(dir.path().join("notes.txt"), "hello").await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].identity.name, "dev");
    }

    #[smol_potat::test]
    async fn test_forced_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        let state = running("dev");
        store.save(&state).await.unwrap();

        store.delete(&state.identity, true).await.unwrap();
        store.delete(&state.identity, true).await.unwrap();
        assert!(matches!(
            store.delete(&state.identity, false).await,
            Err(Error::NotFound(_))
        ));
        assert!(file_names(dir.path()).await.is_empty());
    }
}
