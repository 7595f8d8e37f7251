use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use anndata_portal::app::{Portal, UploadRequest};
use anndata_portal::config::ResolvedConfig;
use anndata_portal::domain::DatasetFormat;
use anndata_portal::error::PortalError;
use anndata_portal::matrix::AnnMatrix;

fn portal(temp: &tempfile::TempDir) -> Portal {
    let data_root = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    let temp_root = Utf8PathBuf::from_path_buf(temp.path().join("tmp")).unwrap();
    Portal::new(ResolvedConfig::with_roots(data_root, temp_root))
}

fn upload(filename: &str, bytes: &[u8], format: DatasetFormat) -> UploadRequest {
    UploadRequest {
        filename: filename.to_string(),
        bytes: bytes.to_vec(),
        format,
        owner: None,
        name: Some(filename.to_string()),
        description: None,
    }
}

fn upload_root_entries(portal: &Portal) -> Vec<String> {
    let mut entries: Vec<String> = fs::read_dir(portal.config().upload_root().as_std_path())
        .map(|dir| {
            dir.map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    entries.sort();
    entries
}

#[test]
fn csv_upload_records_matrix_dimensions() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    let outcome = portal
        .upload(upload(
            "counts.csv",
            b"cell,g1,g2\nc1,1,2\nc2,3,4\nc3,5,6\n",
            DatasetFormat::Csv,
        ))
        .unwrap();

    assert!(outcome.status);
    let record = outcome.record.unwrap();
    assert_eq!(record.n_obs, 3);
    assert_eq!(record.n_vars, 2);

    // recorded dimensions match the canonical file on disk
    let canonical = Utf8PathBuf::from(record.path.clone());
    assert!(canonical.as_std_path().is_file());
    let matrix = AnnMatrix::read_h5ad(&canonical).unwrap();
    assert_eq!(matrix.n_obs() as u64, record.n_obs);
    assert_eq!(matrix.n_vars() as u64, record.n_vars);

    // attrs decode back to the extractor's mapping
    let attrs: BTreeMap<String, Vec<String>> = serde_json::from_str(&record.attrs).unwrap();
    assert_eq!(attrs, matrix.attr_summary());
    assert_eq!(attrs["obs"], vec!["obs_names".to_string()]);
    assert_eq!(attrs["var"], vec!["var_names".to_string()]);
    assert!(attrs["layers"].is_empty());

    // the staged raw upload is gone, only the canonical file remains
    let entries = upload_root_entries(&portal);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("counts_") && entries[0].ends_with(".h5ad"));
}

#[test]
fn zip_archive_is_extracted_renamed_and_removed() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    let mut zip_bytes = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_bytes));
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("bundle/", options).unwrap();
        writer.start_file("bundle/matrix.mtx", options).unwrap();
        writer
            .write_all(b"%%MatrixMarket matrix coordinate real general\n2 2 2\n1 1 1.5\n2 2 4.0\n")
            .unwrap();
        writer.start_file("bundle/obs.tsv", options).unwrap();
        writer.write_all(b"c1\nc2\n").unwrap();
        writer.finish().unwrap();
    }

    let outcome = portal
        .upload(upload("bundle.zip", &zip_bytes, DatasetFormat::Mtx))
        .unwrap();

    assert!(outcome.status, "upload failed: {}", outcome.info);
    let record = outcome.record.unwrap();
    assert_eq!(record.n_obs, 2);
    assert_eq!(record.n_vars, 2);

    // neither the archive nor the extracted directory survive; only the
    // canonical file remains in the upload root
    let entries = upload_root_entries(&portal);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("bundle_") && entries[0].ends_with(".h5ad"));

    let matrix = AnnMatrix::read_h5ad(&Utf8PathBuf::from(record.path)).unwrap();
    assert_eq!(matrix.row(1).unwrap(), &[0.0, 4.0]);
}

#[test]
fn conversion_failure_cleans_up_and_creates_no_record() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    let outcome = portal
        .upload(upload(
            "broken.csv",
            b"cell,g1\nc1,not-a-number\n",
            DatasetFormat::Csv,
        ))
        .unwrap();

    assert!(!outcome.status);
    assert!(outcome.info.starts_with("Internal Error: "));
    assert!(outcome.record.is_none());

    // no canonical file, no staged file, no record
    assert!(upload_root_entries(&portal).is_empty());
    assert!(portal.list_datasets(0, 0).unwrap().is_empty());
}

#[test]
fn json_upload_with_overflowing_dimensions_fails_structurally() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    // declared cell count overflows usize; must come back as a failure
    // outcome, not a fault
    let outcome = portal
        .upload(upload(
            "huge.json",
            br#"{"n_obs":9223372036854775808,"n_vars":2,"x":[]}"#,
            DatasetFormat::Json,
        ))
        .unwrap();

    assert!(!outcome.status);
    assert!(outcome.info.starts_with("Internal Error: "));
    assert!(upload_root_entries(&portal).is_empty());
    assert!(portal.list_datasets(0, 0).unwrap().is_empty());
}

#[test]
fn archive_without_expected_directory_fails_cleanly() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    let mut zip_bytes = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_bytes));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("loose.mtx", options).unwrap();
        writer
            .write_all(b"%%MatrixMarket matrix coordinate real general\n1 1 0\n")
            .unwrap();
        writer.finish().unwrap();
    }

    let outcome = portal
        .upload(upload("bundle.zip", &zip_bytes, DatasetFormat::Mtx))
        .unwrap();

    assert!(!outcome.status);
    assert!(portal.list_datasets(0, 0).unwrap().is_empty());
}

#[test]
fn disallowed_extension_is_rejected_before_staging() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    let err = portal
        .upload(upload("payload.exe", b"MZ", DatasetFormat::Csv))
        .unwrap_err();
    assert_matches!(err, PortalError::UnsupportedExtension(_));
    assert!(upload_root_entries(&portal).is_empty());
}

#[test]
fn filename_without_extension_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    let err = portal
        .upload(upload("noext", b"g1\n1\n", DatasetFormat::Csv))
        .unwrap_err();
    assert_matches!(err, PortalError::InvalidFilename(_));
}

#[test]
fn deleting_a_dataset_removes_its_canonical_file() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    let outcome = portal
        .upload(upload("counts.csv", b"g1\n1\n2\n", DatasetFormat::Csv))
        .unwrap();
    let record = outcome.record.unwrap();
    let canonical = Utf8PathBuf::from(record.path.clone());
    assert!(canonical.as_std_path().is_file());

    portal.delete_dataset(record.id).unwrap();
    assert!(!canonical.as_std_path().exists());
    assert_matches!(
        portal.delete_dataset(record.id).unwrap_err(),
        PortalError::RecordNotFound(_)
    );
}

#[test]
fn update_touches_only_supplied_fields() {
    let temp = tempfile::tempdir().unwrap();
    let portal = portal(&temp);

    let record = portal
        .upload(upload("counts.csv", b"g1\n1\n", DatasetFormat::Csv))
        .unwrap()
        .record
        .unwrap();

    let updated = portal
        .update_dataset(record.id, None, Some("fresh description"))
        .unwrap();
    assert_eq!(updated.name, record.name);
    assert_eq!(updated.description, "fresh description");

    let updated = portal
        .update_dataset(record.id, Some("renamed"), None)
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.description, "fresh description");
}
