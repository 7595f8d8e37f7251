use camino::{Utf8Path, Utf8PathBuf};

use crate::error::PortalError;

/// Extension of the canonical annotated-matrix file.
pub const CANONICAL_EXT: &str = "h5ad";

/// Split an original filename into stem + lower-cased extension on the last
/// `.`. Both halves must be non-empty; `data.tar.gz` yields
/// (`data.tar`, `gz`).
pub fn split_filename(name: &str) -> Result<(&str, String), PortalError> {
    let (stem, ext) = name
        .rsplit_once('.')
        .ok_or_else(|| PortalError::InvalidFilename(name.to_string()))?;
    if stem.is_empty() || ext.is_empty() {
        return Err(PortalError::InvalidFilename(name.to_string()));
    }
    Ok((stem, ext.to_lowercase()))
}

/// Collision-resistant storage name: the stem suffixed with the lowercase
/// hex of an integer-second timestamp. Two uploads sharing a stem within the
/// same second collide; that race is a known, accepted tradeoff.
pub fn hashed_name(stem: &str, unix_secs: i64) -> String {
    format!("{stem}_{unix_secs:x}")
}

/// Resolved storage locations for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPaths {
    pub stem: String,
    pub ext: String,
    pub hashed: String,
    /// Where the raw upload is staged: `<upload_root>/<hashed>.<ext>`.
    pub staging: Utf8PathBuf,
    /// Where the converted matrix lands: `<upload_root>/<hashed>.h5ad`.
    pub canonical: Utf8PathBuf,
}

impl UploadPaths {
    pub fn resolve(
        upload_root: &Utf8Path,
        filename: &str,
        unix_secs: i64,
    ) -> Result<Self, PortalError> {
        let (stem, ext) = split_filename(filename)?;
        let hashed = hashed_name(stem, unix_secs);
        Ok(Self {
            stem: stem.to_string(),
            ext: ext.clone(),
            staging: upload_root.join(format!("{hashed}.{ext}")),
            canonical: upload_root.join(format!("{hashed}.{CANONICAL_EXT}")),
            hashed,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn split_lowercases_extension() {
        let (stem, ext) = split_filename("Counts.CSV").unwrap();
        assert_eq!(stem, "Counts");
        assert_eq!(ext, "csv");
    }

    #[test]
    fn split_keeps_inner_dots_in_stem() {
        let (stem, ext) = split_filename("data.tar.gz").unwrap();
        assert_eq!(stem, "data.tar");
        assert_eq!(ext, "gz");
    }

    #[test]
    fn split_rejects_missing_extension() {
        assert_matches!(
            split_filename("noext").unwrap_err(),
            PortalError::InvalidFilename(_)
        );
        assert_matches!(
            split_filename(".hidden").unwrap_err(),
            PortalError::InvalidFilename(_)
        );
        assert_matches!(
            split_filename("trailing.").unwrap_err(),
            PortalError::InvalidFilename(_)
        );
    }

    #[test]
    fn hashed_name_is_hex_seconds() {
        assert_eq!(hashed_name("counts", 0x65f2_0c00), "counts_65f20c00");
    }

    #[test]
    fn same_stem_same_second_collides() {
        // Documents the accepted weakness of integer-second suffixes: two
        // uploads with the same stem in the same second race on one path.
        let root = Utf8PathBuf::from("/uploads");
        let a = UploadPaths::resolve(&root, "counts.csv", 1_700_000_000).unwrap();
        let b = UploadPaths::resolve(&root, "counts.csv", 1_700_000_000).unwrap();
        assert_eq!(a.staging, b.staging);
        assert_eq!(a.canonical, b.canonical);
    }

    #[test]
    fn resolve_builds_staging_and_canonical_paths() {
        let root = Utf8PathBuf::from("/uploads");
        let paths = UploadPaths::resolve(&root, "counts.csv", 16).unwrap();
        assert_eq!(paths.staging, Utf8PathBuf::from("/uploads/counts_10.csv"));
        assert_eq!(
            paths.canonical,
            Utf8PathBuf::from("/uploads/counts_10.h5ad")
        );
    }
}
