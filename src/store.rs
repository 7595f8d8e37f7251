use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PortalError;

/// One persisted dataset. `path` names the canonical artifact (file or
/// directory) on disk; the record owns it exclusively until deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: u64,
    pub user: String,
    pub name: String,
    pub description: String,
    pub path: String,
    pub n_obs: u64,
    pub n_vars: u64,
    /// JSON-encoded attribute summary of the canonical matrix.
    pub attrs: String,
    /// RFC3339, refreshed on every save.
    pub modified: String,
}

/// Fields of a record the caller supplies; id and `modified` are assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub user: String,
    pub name: String,
    pub description: String,
    pub path: Utf8PathBuf,
    pub n_obs: u64,
    pub n_vars: u64,
    pub attrs: String,
}

/// Dataset record store: one JSON file per record under the records root,
/// ids assigned in insertion order. No locking; the portal runs one request
/// at a time.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    records_root: Utf8PathBuf,
}

impl DatasetStore {
    pub fn new(records_root: Utf8PathBuf) -> Self {
        Self { records_root }
    }

    pub fn records_root(&self) -> &Utf8Path {
        &self.records_root
    }

    pub fn ensure_root(&self) -> Result<(), PortalError> {
        fs::create_dir_all(self.records_root.as_std_path())
            .map_err(|err| PortalError::Filesystem(err.to_string()))
    }

    fn record_path(&self, id: u64) -> Utf8PathBuf {
        self.records_root.join(format!("{id}.json"))
    }

    /// Last assigned id, persisted so deleted ids are never reused. The file
    /// carries no `.json` extension and is invisible to `load_all`.
    fn counter_path(&self) -> Utf8PathBuf {
        self.records_root.join("last_id")
    }

    /// Assign the next id, stamp `modified`, persist. The caller must have
    /// already written the backing artifact: persistence comes last.
    pub fn create(&self, draft: RecordDraft) -> Result<DatasetRecord, PortalError> {
        self.ensure_root()?;
        let id = self.next_id()?;
        write_bytes_atomic(&self.counter_path(), id.to_string().as_bytes())?;
        let record = DatasetRecord {
            id,
            user: draft.user,
            name: draft.name,
            description: draft.description,
            path: draft.path.to_string(),
            n_obs: draft.n_obs,
            n_vars: draft.n_vars,
            attrs: draft.attrs,
            modified: iso_timestamp(),
        };
        self.write_record(&record)?;
        debug!(id, name = %record.name, "created dataset record");
        Ok(record)
    }

    pub fn get(&self, id: u64) -> Result<DatasetRecord, PortalError> {
        let path = self.record_path(id);
        if !path.as_std_path().is_file() {
            return Err(PortalError::RecordNotFound(id));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content).map_err(|err| PortalError::RecordParse(err.to_string()))
    }

    /// Records in insertion (id) order, skipping `offset` and returning at
    /// most `limit` entries; a limit of 0 means unbounded.
    pub fn list(&self, offset: usize, limit: usize) -> Result<Vec<DatasetRecord>, PortalError> {
        let mut records = self.load_all()?;
        records.sort_by_key(|record| record.id);
        let take = if limit == 0 { usize::MAX } else { limit };
        Ok(records.into_iter().skip(offset).take(take).collect())
    }

    /// Apply only the provided fields. Absent or empty values leave a field
    /// unchanged, so an empty-string update is indistinguishable from no
    /// update. Inherited behavior, kept deliberately.
    pub fn update(
        &self,
        id: u64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<DatasetRecord, PortalError> {
        let mut record = self.get(id)?;
        if let Some(name) = name.filter(|value| !value.is_empty()) {
            record.name = name.to_string();
        }
        if let Some(description) = description.filter(|value| !value.is_empty()) {
            record.description = description.to_string();
        }
        record.modified = iso_timestamp();
        self.write_record(&record)?;
        Ok(record)
    }

    /// Remove the backing artifact first, then the record file. A crash in
    /// between orphans the record's slot, never the artifact.
    pub fn delete(&self, id: u64) -> Result<DatasetRecord, PortalError> {
        let record = self.get(id)?;
        remove_artifact(Utf8Path::new(&record.path))?;
        fs::remove_file(self.record_path(id).as_std_path())
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
        debug!(id, "deleted dataset record");
        Ok(record)
    }

    /// Ids are monotonic: the persisted counter survives deletions, the scan
    /// over existing records recovers from a missing counter file.
    fn next_id(&self) -> Result<u64, PortalError> {
        let scanned = self
            .load_all()?
            .into_iter()
            .map(|record| record.id)
            .max()
            .unwrap_or(0);
        Ok(scanned.max(self.read_counter()?) + 1)
    }

    fn read_counter(&self) -> Result<u64, PortalError> {
        let path = self.counter_path();
        if !path.as_std_path().is_file() {
            return Ok(0);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
        content
            .trim()
            .parse()
            .map_err(|err: std::num::ParseIntError| PortalError::RecordParse(err.to_string()))
    }

    fn load_all(&self) -> Result<Vec<DatasetRecord>, PortalError> {
        if !self.records_root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let entries = fs::read_dir(self.records_root.as_std_path())
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| PortalError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let content = fs::read_to_string(&path)
                .map_err(|err| PortalError::Filesystem(err.to_string()))?;
            let record: DatasetRecord = serde_json::from_str(&content)
                .map_err(|err| PortalError::RecordParse(err.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    fn write_record(&self, record: &DatasetRecord) -> Result<(), PortalError> {
        let content = serde_json::to_vec_pretty(record)
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.record_path(record.id), &content)
    }
}

pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Write via a sibling tmp file + rename so readers never observe a partial
/// file.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PortalError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    if let Err(err) = fs::write(tmp_path.as_std_path(), content) {
        remove_artifact_best_effort(&tmp_path);
        return Err(PortalError::Filesystem(err.to_string()));
    }
    if let Err(err) = fs::rename(tmp_path.as_std_path(), path.as_std_path()) {
        remove_artifact_best_effort(&tmp_path);
        return Err(PortalError::Filesystem(err.to_string()));
    }
    Ok(())
}

/// Remove a file or recursively remove a directory; a missing path is fine.
pub fn remove_artifact(path: &Utf8Path) -> Result<(), PortalError> {
    let std_path = path.as_std_path();
    if std_path.is_dir() {
        fs::remove_dir_all(std_path).map_err(|err| PortalError::Filesystem(err.to_string()))
    } else if std_path.is_file() {
        fs::remove_file(std_path).map_err(|err| PortalError::Filesystem(err.to_string()))
    } else {
        Ok(())
    }
}

/// Best-effort cleanup used on failure paths; never masks the original
/// error.
pub fn remove_artifact_best_effort(path: &Utf8Path) {
    if let Err(err) = remove_artifact(path) {
        tracing::warn!(%path, %err, "cleanup failed");
    }
}
