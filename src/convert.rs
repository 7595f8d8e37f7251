use std::fs;

use camino::Utf8Path;
use tracing::debug;

use crate::domain::DatasetFormat;
use crate::error::PortalError;
use crate::matrix::{AnnMatrix, Scalar};
use crate::store::remove_artifact;

/// Upper bound on dense cells materialized from a MatrixMarket size line.
/// 2^28 f64 cells is a 2 GiB buffer; the size line is untrusted input and
/// must not dictate the allocation on its own.
const MAX_MTX_CELLS: usize = 1 << 28;

/// Run the conversion step: load the prepared input through the closed
/// format registry, delete the prepared path, then write the canonical file.
/// The prepared path is deleted *before* the canonical write, matching the
/// pipeline's side-effects-before-persistence ordering; the canonical write
/// itself is atomic, so a failure here leaves no partial `.h5ad` behind.
///
/// Every failure inside this function is a conversion failure: the boundary
/// converts it into a structured outcome instead of a fault.
pub fn invoke(
    format: DatasetFormat,
    prepared: &Utf8Path,
    canonical: &Utf8Path,
) -> Result<AnnMatrix, PortalError> {
    let matrix = load_matrix(format, prepared)?;
    debug!(%prepared, n_obs = matrix.n_obs(), n_vars = matrix.n_vars(), "converted upload");
    remove_artifact(prepared).map_err(|err| PortalError::Conversion(err.to_string()))?;
    matrix
        .write_h5ad(canonical)
        .map_err(|err| PortalError::Conversion(err.to_string()))?;
    Ok(matrix)
}

/// Closed mapping from format identifier to parser. This is the whole
/// dispatch surface: no dynamic symbol resolution, unknown identifiers are
/// rejected at request parsing.
pub fn load_matrix(format: DatasetFormat, path: &Utf8Path) -> Result<AnnMatrix, PortalError> {
    match format {
        DatasetFormat::Csv => load_delimited(path, b','),
        DatasetFormat::Tsv => load_delimited(path, b'\t'),
        DatasetFormat::Json => load_json(path),
        DatasetFormat::Mtx => load_mtx(path),
    }
}

fn conversion(err: impl std::fmt::Display) -> PortalError {
    PortalError::Conversion(err.to_string())
}

/// Delimited table: header row names the variables; a leading non-numeric
/// column (or an unnamed first header) supplies observation names.
fn load_delimited(path: &Utf8Path, delimiter: u8) -> Result<AnnMatrix, PortalError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path.as_std_path())
        .map_err(conversion)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(conversion)?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.is_empty() {
        return Err(PortalError::Conversion(format!("{path}: empty header row")));
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.map_err(|err| PortalError::Conversion(format!("row {row_no}: {err}")))?;
        if record.len() != headers.len() {
            return Err(PortalError::Conversion(format!(
                "row {row_no}: has {} fields, header has {}",
                record.len(),
                headers.len()
            )));
        }
        rows.push(record.iter().map(|field| field.to_string()).collect());
    }

    let has_obs_names = headers[0].is_empty()
        || rows
            .iter()
            .any(|row| row[0].trim().parse::<f64>().is_err());
    let first_value_col = usize::from(has_obs_names);
    let n_obs = rows.len();
    let n_vars = headers.len() - first_value_col;

    let mut x = Vec::with_capacity(n_obs * n_vars);
    for (row_no, row) in rows.iter().enumerate() {
        for (col, field) in row.iter().enumerate().skip(first_value_col) {
            let value = field.trim().parse::<f64>().map_err(|_| {
                PortalError::Conversion(format!(
                    "row {row_no}, column {}: '{field}' is not a number",
                    headers[col]
                ))
            })?;
            x.push(value);
        }
    }

    let mut matrix = AnnMatrix::new(n_obs, n_vars, x).map_err(conversion)?;
    matrix.insert_var_column(
        "var_names",
        headers[first_value_col..]
            .iter()
            .map(|name| Scalar::String(name.clone()))
            .collect(),
    )?;
    if has_obs_names {
        matrix.insert_obs_column(
            "obs_names",
            rows.iter()
                .map(|row| Scalar::String(row[0].clone()))
                .collect(),
        )?;
    }
    Ok(matrix)
}

/// JSON uploads carry the canonical document itself.
fn load_json(path: &Utf8Path) -> Result<AnnMatrix, PortalError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| PortalError::Conversion(format!("read {path}: {err}")))?;
    let matrix: AnnMatrix = serde_json::from_str(&content)
        .map_err(|err| PortalError::Conversion(format!("parse {path}: {err}")))?;
    matrix.validate().map_err(conversion)?;
    Ok(matrix)
}

/// MatrixMarket coordinate input. Accepts either a bare `.mtx` file or a
/// directory (the extracted-archive case) containing `matrix.mtx` plus
/// optional `obs.tsv` / `var.tsv` name lists, one name per line.
fn load_mtx(path: &Utf8Path) -> Result<AnnMatrix, PortalError> {
    if path.as_std_path().is_dir() {
        let mut matrix = parse_mtx_file(&path.join("matrix.mtx"))?;
        if let Some(names) = read_name_list(&path.join("obs.tsv"))? {
            if names.len() != matrix.n_obs() {
                return Err(PortalError::Conversion(format!(
                    "obs.tsv lists {} names, matrix has {} rows",
                    names.len(),
                    matrix.n_obs()
                )));
            }
            matrix.insert_obs_column("obs_names", names)?;
        }
        if let Some(names) = read_name_list(&path.join("var.tsv"))? {
            if names.len() != matrix.n_vars() {
                return Err(PortalError::Conversion(format!(
                    "var.tsv lists {} names, matrix has {} columns",
                    names.len(),
                    matrix.n_vars()
                )));
            }
            matrix.insert_var_column("var_names", names)?;
        }
        Ok(matrix)
    } else {
        parse_mtx_file(path)
    }
}

fn parse_mtx_file(path: &Utf8Path) -> Result<AnnMatrix, PortalError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| PortalError::Conversion(format!("read {path}: {err}")))?;
    let mut lines = content
        .lines()
        .filter(|line| !line.starts_with('%') && !line.trim().is_empty());

    let size_line = lines
        .next()
        .ok_or_else(|| PortalError::Conversion(format!("{path}: missing size line")))?;
    let dims = size_line
        .split_whitespace()
        .map(|token| token.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| PortalError::Conversion(format!("{path}: bad size line '{size_line}'")))?;
    let &[n_obs, n_vars, n_entries] = dims.as_slice() else {
        return Err(PortalError::Conversion(format!(
            "{path}: size line must be 'rows cols entries'"
        )));
    };

    let cells = n_obs
        .checked_mul(n_vars)
        .filter(|&cells| cells <= MAX_MTX_CELLS)
        .ok_or_else(|| {
            PortalError::Conversion(format!(
                "{path}: {n_obs} x {n_vars} exceeds the supported dense matrix size"
            ))
        })?;
    let mut x = vec![0.0; cells];
    let mut seen = 0usize;
    for line in lines {
        let mut tokens = line.split_whitespace();
        let (Some(row), Some(col), Some(value)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(PortalError::Conversion(format!(
                "{path}: bad entry line '{line}'"
            )));
        };
        let row: usize = row
            .parse()
            .map_err(|_| PortalError::Conversion(format!("{path}: bad row index '{row}'")))?;
        let col: usize = col
            .parse()
            .map_err(|_| PortalError::Conversion(format!("{path}: bad column index '{col}'")))?;
        let value: f64 = value
            .parse()
            .map_err(|_| PortalError::Conversion(format!("{path}: bad value '{value}'")))?;
        // MatrixMarket indices are 1-based
        if row == 0 || row > n_obs || col == 0 || col > n_vars {
            return Err(PortalError::Conversion(format!(
                "{path}: entry ({row}, {col}) outside {n_obs} x {n_vars}"
            )));
        }
        x[(row - 1) * n_vars + (col - 1)] = value;
        seen += 1;
    }
    if seen != n_entries {
        return Err(PortalError::Conversion(format!(
            "{path}: header promises {n_entries} entries, found {seen}"
        )));
    }

    AnnMatrix::new(n_obs, n_vars, x).map_err(conversion)
}

fn read_name_list(path: &Utf8Path) -> Result<Option<Vec<Scalar>>, PortalError> {
    if !path.as_std_path().is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| PortalError::Conversion(format!("read {path}: {err}")))?;
    let names = content
        .lines()
        .map(|line| Scalar::String(line.trim().to_string()))
        .collect();
    Ok(Some(names))
}
