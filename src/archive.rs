use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::domain::ArchiveKind;
use crate::error::PortalError;

/// Normalize an archive upload: extract into the upload root, rename the
/// extracted top-level directory (named after the original stem) to the
/// hashed name, delete the archive file. Returns the renamed directory,
/// which becomes the conversion input.
pub fn normalize(
    kind: ArchiveKind,
    archive_path: &Utf8Path,
    stem: &str,
    hashed: &str,
    upload_root: &Utf8Path,
) -> Result<Utf8PathBuf, PortalError> {
    match kind {
        ArchiveKind::Zip => extract_zip(archive_path.as_std_path(), upload_root.as_std_path())?,
        ArchiveKind::Tar => extract_tar(archive_path.as_std_path(), upload_root.as_std_path())?,
        ArchiveKind::TarGz => {
            extract_tar_gz(archive_path.as_std_path(), upload_root.as_std_path())?
        }
    }

    let extracted = upload_root.join(kind.inner_stem(stem));
    if !extracted.as_std_path().is_dir() {
        // Extracted entries are left in place for inspection; the archive is
        // removed by the caller's failure cleanup.
        return Err(PortalError::ArchiveLayout(format!(
            "archive does not contain a top-level directory named {}",
            kind.inner_stem(stem)
        )));
    }

    let renamed = upload_root.join(hashed);
    fs::rename(extracted.as_std_path(), renamed.as_std_path())
        .map_err(|err| PortalError::Filesystem(err.to_string()))?;
    fs::remove_file(archive_path.as_std_path())
        .map_err(|err| PortalError::Filesystem(err.to_string()))?;
    Ok(renamed)
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), PortalError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        PortalError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| PortalError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(PortalError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| PortalError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| PortalError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| PortalError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn extract_tar(tar_path: &Path, target_dir: &Path) -> Result<(), PortalError> {
    let file = fs::File::open(tar_path).map_err(|err| {
        PortalError::Filesystem(format!("open tar {}: {err}", tar_path.display()))
    })?;
    // Archive::unpack refuses entries escaping the target directory.
    Archive::new(file)
        .unpack(target_dir)
        .map_err(|err| PortalError::Filesystem(err.to_string()))
}

pub fn extract_tar_gz(tar_gz_path: &Path, target_dir: &Path) -> Result<(), PortalError> {
    let file = fs::File::open(tar_gz_path).map_err(|err| {
        PortalError::Filesystem(format!("open tar.gz {}: {err}", tar_gz_path.display()))
    })?;
    Archive::new(GzDecoder::new(file))
        .unpack(target_dir)
        .map_err(|err| PortalError::Filesystem(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    fn write_zip(path: &Path, dir_name: &str) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer
            .add_directory(format!("{dir_name}/"), options)
            .unwrap();
        writer
            .start_file(format!("{dir_name}/matrix.mtx"), options)
            .unwrap();
        writer
            .write_all(b"%%MatrixMarket matrix coordinate real general\n2 2 1\n1 1 3.5\n")
            .unwrap();
        writer.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, dir_name: &str) {
        let file = fs::File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let content = b"%%MatrixMarket matrix coordinate real general\n2 2 1\n1 1 3.5\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                format!("{dir_name}/matrix.mtx"),
                content.as_slice(),
            )
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn normalize_zip_renames_and_removes_archive() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let archive_path = root.join("counts_10.zip");
        write_zip(archive_path.as_std_path(), "counts");

        let prepared =
            normalize(ArchiveKind::Zip, &archive_path, "counts", "counts_10", &root).unwrap();

        assert_eq!(prepared, root.join("counts_10"));
        assert!(prepared.as_std_path().is_dir());
        assert!(prepared.join("matrix.mtx").as_std_path().is_file());
        assert!(!archive_path.as_std_path().exists());
        assert!(!root.join("counts").as_std_path().exists());
    }

    #[test]
    fn normalize_tar_gz_trims_inner_tar_stem() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let archive_path = root.join("counts.tar_10.gz");
        write_tar_gz(archive_path.as_std_path(), "counts");

        let prepared = normalize(
            ArchiveKind::TarGz,
            &archive_path,
            "counts.tar",
            "counts.tar_10",
            &root,
        )
        .unwrap();

        assert_eq!(prepared, root.join("counts.tar_10"));
        assert!(prepared.join("matrix.mtx").as_std_path().is_file());
        assert!(!archive_path.as_std_path().exists());
    }

    #[test]
    fn normalize_fails_without_expected_top_level_dir() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let archive_path = root.join("other_10.zip");
        write_zip(archive_path.as_std_path(), "unexpected");

        let err =
            normalize(ArchiveKind::Zip, &archive_path, "other", "other_10", &root).unwrap_err();
        assert_matches!(err, PortalError::ArchiveLayout(_));
    }
}
