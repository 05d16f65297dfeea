use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use crate::config::ArtifactConfig;
use crate::core::cycle::Cycle;
use crate::error::{Error, Result};
use crate::types::ids::CycleId;
use crate::utils::helper::write_atomic;

const LATEST: &str = "latest.json";

/// Writes published cycles to disk for file-based consumers.
///
/// ## Layout
/// - `latest.json`: the authoritative artifact, replaced by rename
/// - `cycle-{id}.json`: one file per published cycle, oldest pruned past
///   `history_retention`
///
/// Both are JSON with the cycle checksum embedded; loading verifies it.
pub struct ArtifactWriter {
    dir: PathBuf,
    retention: usize,
}

impl ArtifactWriter {
    pub fn new(config: &ArtifactConfig) -> Self {
        ArtifactWriter {
            dir: config.dir.clone(),
            retention: config.history_retention.max(1),
        }
    }

    fn history_path(&self, id: CycleId) -> PathBuf {
        self.dir.join(format!("cycle-{:010}.json", id.0))
    }

    pub async fn publish(&self, cycle: &Cycle) -> Result<()> {
        async_fs::create_dir_all(&self.dir).await?;

        let data = serde_json::to_vec_pretty(cycle)
            .map_err(|e| Error::SerializationError(e.to_string()))?;

        // history first: latest.json must never point past what is on disk
        write_atomic(&self.history_path(cycle.id), &data).await?;
        write_atomic(&self.dir.join(LATEST), &data).await?;

        tracing::info!("Wrote cycle {} artifact to {:?}", cycle.id, self.dir);

        // latest.json already names this cycle, so retention must not fail it
        if let Err(e) = self.prune().await {
            tracing::warn!("Pruning cycle artifacts in {:?} failed: {}", self.dir, e);
        }
        Ok(())
    }

    /// The last published cycle, if any. A corrupt artifact is an error,
    /// not an empty result.
    pub async fn load_latest(&self) -> Result<Option<Cycle>> {
        self.load(&self.dir.join(LATEST)).await
    }

    pub async fn load_cycle(&self, id: CycleId) -> Result<Option<Cycle>> {
        self.load(&self.history_path(id)).await
    }

    async fn load(&self, path: &Path) -> Result<Option<Cycle>> {
        let data = match async_fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let cycle: Cycle = serde_json::from_slice(&data)
            .map_err(|e| Error::DeserializationError(e.to_string()))?;
        if !cycle.verify_checksum() {
            return Err(Error::InvalidChecksum);
        }
        Ok(Some(cycle))
    }

    /// Ids of cycle files on disk, oldest first.
    pub async fn list_history(&self) -> Result<Vec<CycleId>> {
        let mut ids = Vec::new();
        let mut entries = match async_fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let id = entry.file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("cycle-"))
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(id) = id {
                ids.push(CycleId(id));
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn prune(&self) -> Result<()> {
        let ids = self.list_history().await?;
        if ids.len() <= self.retention {
            return Ok(());
        }

        for id in &ids[..ids.len() - self.retention] {
            async_fs::remove_file(self.history_path(*id)).await?;
            tracing::debug!("Pruned cycle artifact {}", id);
        }
        Ok(())
    }
}
