use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PortalError;

/// Closed registry of ingestible dataset formats. Uploads name one of these
/// identifiers; anything else is rejected before the pipeline touches the
/// prepared input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    Csv,
    Tsv,
    Json,
    Mtx,
}

impl DatasetFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetFormat::Csv => "csv",
            DatasetFormat::Tsv => "tsv",
            DatasetFormat::Json => "json",
            DatasetFormat::Mtx => "mtx",
        }
    }

    pub fn all() -> &'static [DatasetFormat] {
        &[
            DatasetFormat::Csv,
            DatasetFormat::Tsv,
            DatasetFormat::Json,
            DatasetFormat::Mtx,
        ]
    }
}

impl fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DatasetFormat {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Ok(DatasetFormat::Csv),
            "tsv" => Ok(DatasetFormat::Tsv),
            "json" => Ok(DatasetFormat::Json),
            "mtx" => Ok(DatasetFormat::Mtx),
            _ => Err(PortalError::UnknownFormat(value.to_string())),
        }
    }
}

/// Archive formats the normalizer knows how to unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Detect an archive upload from the split filename. `data.tar.gz` splits
    /// into stem `data.tar` + ext `gz`, so gzip is only treated as an archive
    /// when the stem carries the inner `.tar`.
    pub fn detect(stem: &str, ext: &str) -> Option<ArchiveKind> {
        match ext {
            "zip" => Some(ArchiveKind::Zip),
            "tar" => Some(ArchiveKind::Tar),
            "gz" | "tgz" if ext == "tgz" || stem.ends_with(".tar") => Some(ArchiveKind::TarGz),
            _ => None,
        }
    }

    /// Name of the top-level directory the archive is expected to contain,
    /// derived from the original stem.
    pub fn inner_stem<'a>(&self, stem: &'a str) -> &'a str {
        match self {
            ArchiveKind::TarGz => stem.strip_suffix(".tar").unwrap_or(stem),
            _ => stem,
        }
    }
}

/// Parsed comma-separated row index list from an export request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSelection(Vec<usize>);

impl RowSelection {
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for RowSelection {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(PortalError::InvalidIndexList(value.to_string()));
        }
        let indices = trimmed
            .split(',')
            .map(|token| {
                token
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| PortalError::InvalidIndexList(value.to_string()))
            })
            .collect::<Result<Vec<_>, PortalError>>()?;
        Ok(Self(indices))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_dataset_format() {
        let format: DatasetFormat = "CSV".parse().unwrap();
        assert_eq!(format, DatasetFormat::Csv);
        assert_eq!(format.as_str(), "csv");
    }

    #[test]
    fn parse_dataset_format_unknown() {
        let err = "scanpy.read_10x".parse::<DatasetFormat>().unwrap_err();
        assert_matches!(err, PortalError::UnknownFormat(_));
    }

    #[test]
    fn detect_archive_kinds() {
        assert_eq!(ArchiveKind::detect("counts", "zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("counts", "tar"), Some(ArchiveKind::Tar));
        assert_eq!(
            ArchiveKind::detect("counts.tar", "gz"),
            Some(ArchiveKind::TarGz)
        );
        assert_eq!(
            ArchiveKind::detect("counts", "tgz"),
            Some(ArchiveKind::TarGz)
        );
        assert_eq!(ArchiveKind::detect("counts", "gz"), None);
        assert_eq!(ArchiveKind::detect("counts", "csv"), None);
    }

    #[test]
    fn archive_inner_stem_trims_tar() {
        assert_eq!(ArchiveKind::TarGz.inner_stem("counts.tar"), "counts");
        assert_eq!(ArchiveKind::Zip.inner_stem("counts"), "counts");
    }

    #[test]
    fn parse_row_selection() {
        let selection: RowSelection = "2, 0,0".parse().unwrap();
        assert_eq!(selection.indices(), &[2, 0, 0]);
    }

    #[test]
    fn parse_row_selection_rejects_garbage() {
        let err = "1,two,3".parse::<RowSelection>().unwrap_err();
        assert_matches!(err, PortalError::InvalidIndexList(_));
        let err = "".parse::<RowSelection>().unwrap_err();
        assert_matches!(err, PortalError::InvalidIndexList(_));
    }
}
