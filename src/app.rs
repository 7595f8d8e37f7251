use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::archive;
use crate::config::{ResolvedConfig, ensure_dir};
use crate::convert;
use crate::domain::{ArchiveKind, DatasetFormat, RowSelection};
use crate::error::PortalError;
use crate::matrix::AnnMatrix;
use crate::naming::UploadPaths;
use crate::store::{DatasetRecord, DatasetStore, RecordDraft, remove_artifact_best_effort};

/// An upload: raw bytes plus the declared format and optional record
/// overrides. Not persisted.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub format: DatasetFormat,
    pub owner: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A row-subset export from a previously computed results file. Not
/// persisted.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Names a results directory under the temp root.
    pub pid: String,
    /// Comma-separated row indices; order and duplicates are preserved.
    pub index: String,
    pub owner: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub status: bool,
    pub info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<DatasetRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub status: bool,
    pub info: String,
    /// Display rendering of the sliced matrix.
    pub output: String,
    pub record: DatasetRecord,
}

/// Pipeline orchestrator. Holds the explicit roots and the record store;
/// one request runs to completion at a time.
#[derive(Debug, Clone)]
pub struct Portal {
    config: ResolvedConfig,
    store: DatasetStore,
}

impl Portal {
    pub fn new(config: ResolvedConfig) -> Self {
        let store = DatasetStore::new(config.records_root());
        Self { config, store }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Ingest an upload. Request-shape problems (bad filename, extension not
    /// in the allow-list) propagate as errors before any side effect; once
    /// the pipeline is running, failures are caught here, the prepared input
    /// is cleaned up, and a `status: false` outcome carrying the error text
    /// is returned instead.
    pub fn upload(&self, request: UploadRequest) -> Result<UploadOutcome, PortalError> {
        if request.filename.is_empty() {
            return Err(PortalError::MissingField("file"));
        }
        let upload_root = self.config.upload_root();
        let paths = UploadPaths::resolve(
            &upload_root,
            &request.filename,
            chrono::Utc::now().timestamp(),
        )?;
        if !self.config.extension_allowed(&paths.ext) {
            return Err(PortalError::UnsupportedExtension(paths.ext.clone()));
        }

        ensure_dir(&upload_root)?;
        crate::store::write_bytes_atomic(&paths.staging, &request.bytes)?;
        debug!(filename = %request.filename, staged = %paths.staging, "staged upload");

        let prepared = match self.prepare_input(&paths, &upload_root) {
            Ok(prepared) => prepared,
            Err(err) => {
                remove_artifact_best_effort(&paths.staging);
                return Ok(UploadOutcome {
                    status: false,
                    info: format!("Internal Error: {err}"),
                    record: None,
                });
            }
        };

        let matrix = match convert::invoke(request.format, &prepared, &paths.canonical) {
            Ok(matrix) => matrix,
            Err(err) => {
                remove_artifact_best_effort(&prepared);
                return Ok(UploadOutcome {
                    status: false,
                    info: format!("Internal Error: {err}"),
                    record: None,
                });
            }
        };

        // Side effects are done; persistence comes last. A crash before this
        // point orphans the canonical file, never a record.
        let record = self.store.create(RecordDraft {
            user: request.owner.unwrap_or_else(|| "Upload".to_string()),
            name: request.name.unwrap_or_else(|| "uploaded-file".to_string()),
            description: request.description.unwrap_or_default(),
            path: paths.canonical.clone(),
            n_obs: matrix.n_obs() as u64,
            n_vars: matrix.n_vars() as u64,
            attrs: encode_attrs(&matrix)?,
        })?;

        Ok(UploadOutcome {
            status: true,
            info: format!("File successfully uploaded as {}.h5ad", record.name),
            record: Some(record),
        })
    }

    /// Archive uploads are extracted and renamed to the hashed name; plain
    /// files pass through unchanged.
    fn prepare_input(
        &self,
        paths: &UploadPaths,
        upload_root: &Utf8Path,
    ) -> Result<Utf8PathBuf, PortalError> {
        match ArchiveKind::detect(&paths.stem, &paths.ext) {
            Some(kind) => archive::normalize(
                kind,
                &paths.staging,
                &paths.stem,
                &paths.hashed,
                upload_root,
            ),
            None => Ok(paths.staging.clone()),
        }
    }

    /// Slice rows out of a computed results file into a new dataset record.
    pub fn export(&self, request: ExportRequest) -> Result<ExportOutcome, PortalError> {
        if request.pid.is_empty() {
            return Err(PortalError::MissingField("pid"));
        }
        let results_path = self.config.results_path(&request.pid);
        if !results_path.as_std_path().is_file() {
            return Err(PortalError::ResultsNotFound(request.pid.clone()));
        }

        let matrix = AnnMatrix::read_h5ad(&results_path)?;
        let selection: RowSelection = request.index.parse()?;
        let sliced = matrix.select_rows(selection.indices())?;

        let upload_root = self.config.upload_root();
        ensure_dir(&upload_root)?;
        let hextime = format!("{:x}", chrono::Utc::now().timestamp());
        let output_path = upload_root.join(format!("exported_{}_{hextime}.h5ad", request.pid));
        sliced.write_h5ad(&output_path)?;
        debug!(pid = %request.pid, rows = selection.len(), output = %output_path, "exported rows");

        let record = self.store.create(RecordDraft {
            user: request
                .owner
                .unwrap_or_else(|| format!("Export from {}", request.pid)),
            name: request
                .name
                .unwrap_or_else(|| format!("export_{}", request.pid)),
            description: request.description.unwrap_or_default(),
            path: output_path,
            n_obs: sliced.n_obs() as u64,
            n_vars: sliced.n_vars() as u64,
            attrs: encode_attrs(&sliced)?,
        })?;

        Ok(ExportOutcome {
            status: true,
            info: format!("File successfully exported as {}.h5ad", record.name),
            output: sliced.to_string(),
            record,
        })
    }

    pub fn list_datasets(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DatasetRecord>, PortalError> {
        self.store.list(offset, limit)
    }

    pub fn update_dataset(
        &self,
        id: u64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<DatasetRecord, PortalError> {
        self.store.update(id, name, description)
    }

    pub fn delete_dataset(&self, id: u64) -> Result<DatasetRecord, PortalError> {
        self.store.delete(id)
    }
}

fn encode_attrs(matrix: &AnnMatrix) -> Result<String, PortalError> {
    serde_json::to_string(&matrix.attr_summary())
        .map_err(|err| PortalError::Filesystem(err.to_string()))
}
