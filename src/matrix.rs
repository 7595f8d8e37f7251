use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::PortalError;
use crate::store::write_bytes_atomic;

/// A single annotation cell. Mirrors the scalar dtypes commonly found in
/// observation/variable tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

/// In-memory annotated matrix: a dense row-major 2D numeric matrix paired
/// with row-level (`obs`) and column-level (`var`) annotation tables, an
/// unstructured key/value store (`uns`), same-shape named layers, and
/// multi-dimensional slots keyed per row (`obsm`) or per column (`varm`).
///
/// The canonical on-disk form is the JSON serialization of this struct under
/// a `.h5ad` extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnMatrix {
    n_obs: usize,
    n_vars: usize,
    x: Vec<f64>,
    #[serde(default)]
    obs: BTreeMap<String, Vec<Scalar>>,
    #[serde(default)]
    var: BTreeMap<String, Vec<Scalar>>,
    #[serde(default)]
    uns: BTreeMap<String, JsonValue>,
    #[serde(default)]
    layers: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    obsm: BTreeMap<String, Vec<Vec<f64>>>,
    #[serde(default)]
    varm: BTreeMap<String, Vec<Vec<f64>>>,
}

impl AnnMatrix {
    /// Build a matrix from row-major values. `x.len()` must equal
    /// `n_obs * n_vars`.
    pub fn new(n_obs: usize, n_vars: usize, x: Vec<f64>) -> Result<Self, PortalError> {
        let expected = cell_count(n_obs, n_vars)?;
        if x.len() != expected {
            return Err(PortalError::Shape(format!(
                "matrix data has {} values, expected {expected} ({n_obs} x {n_vars})",
                x.len(),
            )));
        }
        Ok(Self {
            n_obs,
            n_vars,
            x,
            obs: BTreeMap::new(),
            var: BTreeMap::new(),
            uns: BTreeMap::new(),
            layers: BTreeMap::new(),
            obsm: BTreeMap::new(),
            varm: BTreeMap::new(),
        })
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    /// Row `index` as a slice, or `None` when the index is past `n_obs`.
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        if index >= self.n_obs {
            return None;
        }
        Some(&self.x[index * self.n_vars..(index + 1) * self.n_vars])
    }

    pub fn obs_column(&self, name: &str) -> Option<&[Scalar]> {
        self.obs.get(name).map(Vec::as_slice)
    }

    pub fn var_column(&self, name: &str) -> Option<&[Scalar]> {
        self.var.get(name).map(Vec::as_slice)
    }

    pub fn insert_obs_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Scalar>,
    ) -> Result<(), PortalError> {
        if values.len() != self.n_obs {
            return Err(PortalError::Shape(format!(
                "obs column has {} values, expected {}",
                values.len(),
                self.n_obs
            )));
        }
        self.obs.insert(name.into(), values);
        Ok(())
    }

    pub fn insert_var_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Scalar>,
    ) -> Result<(), PortalError> {
        if values.len() != self.n_vars {
            return Err(PortalError::Shape(format!(
                "var column has {} values, expected {}",
                values.len(),
                self.n_vars
            )));
        }
        self.var.insert(name.into(), values);
        Ok(())
    }

    pub fn insert_uns(&mut self, key: impl Into<String>, value: JsonValue) {
        self.uns.insert(key.into(), value);
    }

    pub fn insert_layer(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), PortalError> {
        if values.len() != self.x.len() {
            return Err(PortalError::Shape(format!(
                "layer has {} values, expected {}",
                values.len(),
                self.x.len()
            )));
        }
        self.layers.insert(name.into(), values);
        Ok(())
    }

    pub fn insert_obsm(
        &mut self,
        name: impl Into<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<(), PortalError> {
        if rows.len() != self.n_obs {
            return Err(PortalError::Shape(format!(
                "obsm slot has {} rows, expected {}",
                rows.len(),
                self.n_obs
            )));
        }
        self.obsm.insert(name.into(), rows);
        Ok(())
    }

    pub fn insert_varm(
        &mut self,
        name: impl Into<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<(), PortalError> {
        if rows.len() != self.n_vars {
            return Err(PortalError::Shape(format!(
                "varm slot has {} rows, expected {}",
                rows.len(),
                self.n_vars
            )));
        }
        self.varm.insert(name.into(), rows);
        Ok(())
    }

    /// Mapping from annotation collection name to its member names/keys.
    /// Empty collections yield empty lists; the JSON encoding of the result
    /// round-trips to the identical mapping.
    pub fn attr_summary(&self) -> BTreeMap<String, Vec<String>> {
        let keys = |names: Vec<&String>| names.into_iter().cloned().collect::<Vec<_>>();
        let mut summary = BTreeMap::new();
        summary.insert("obs".to_string(), keys(self.obs.keys().collect()));
        summary.insert("var".to_string(), keys(self.var.keys().collect()));
        summary.insert("uns".to_string(), keys(self.uns.keys().collect()));
        summary.insert("layers".to_string(), keys(self.layers.keys().collect()));
        summary.insert("obsm".to_string(), keys(self.obsm.keys().collect()));
        summary.insert("varm".to_string(), keys(self.varm.keys().collect()));
        summary
    }

    /// Row selection with reordering: the output contains exactly the rows
    /// named by `indices`, in that order, duplicates included. Column-level
    /// collections (`var`, `varm`, `uns`) carry over unchanged.
    pub fn select_rows(&self, indices: &[usize]) -> Result<AnnMatrix, PortalError> {
        for &index in indices {
            if index >= self.n_obs {
                return Err(PortalError::IndexOutOfRange {
                    index,
                    n_obs: self.n_obs,
                });
            }
        }

        let gather = |values: &[f64]| {
            let mut out = Vec::with_capacity(indices.len().saturating_mul(self.n_vars));
            for &index in indices {
                out.extend_from_slice(&values[index * self.n_vars..(index + 1) * self.n_vars]);
            }
            out
        };

        let obs = self
            .obs
            .iter()
            .map(|(name, column)| {
                let picked = indices.iter().map(|&i| column[i].clone()).collect();
                (name.clone(), picked)
            })
            .collect();
        let layers = self
            .layers
            .iter()
            .map(|(name, values)| (name.clone(), gather(values)))
            .collect();
        let obsm = self
            .obsm
            .iter()
            .map(|(name, rows)| {
                let picked = indices.iter().map(|&i| rows[i].clone()).collect();
                (name.clone(), picked)
            })
            .collect();

        Ok(AnnMatrix {
            n_obs: indices.len(),
            n_vars: self.n_vars,
            x: gather(&self.x),
            obs,
            var: self.var.clone(),
            uns: self.uns.clone(),
            layers,
            obsm,
            varm: self.varm.clone(),
        })
    }

    /// Shape consistency check applied after deserializing a canonical file.
    /// Declared dimensions are untrusted input here, so the cell count is
    /// computed checked.
    pub fn validate(&self) -> Result<(), PortalError> {
        let expected = cell_count(self.n_obs, self.n_vars)?;
        if self.x.len() != expected {
            return Err(PortalError::Shape(format!(
                "matrix data has {} values, expected {expected}",
                self.x.len(),
            )));
        }
        for (name, column) in &self.obs {
            if column.len() != self.n_obs {
                return Err(PortalError::Shape(format!("obs column {name} length")));
            }
        }
        for (name, column) in &self.var {
            if column.len() != self.n_vars {
                return Err(PortalError::Shape(format!("var column {name} length")));
            }
        }
        for (name, values) in &self.layers {
            if values.len() != expected {
                return Err(PortalError::Shape(format!("layer {name} length")));
            }
        }
        for (name, rows) in &self.obsm {
            if rows.len() != self.n_obs {
                return Err(PortalError::Shape(format!("obsm slot {name} length")));
            }
        }
        for (name, rows) in &self.varm {
            if rows.len() != self.n_vars {
                return Err(PortalError::Shape(format!("varm slot {name} length")));
            }
        }
        Ok(())
    }

    pub fn read_h5ad(path: &Utf8Path) -> Result<AnnMatrix, PortalError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| PortalError::Filesystem(format!("read {path}: {err}")))?;
        let matrix: AnnMatrix = serde_json::from_str(&content)
            .map_err(|err| PortalError::Filesystem(format!("parse {path}: {err}")))?;
        matrix.validate()?;
        Ok(matrix)
    }

    /// Write the canonical file. The write is tmp-file + rename so a failure
    /// never leaves a partial canonical file behind.
    pub fn write_h5ad(&self, path: &Utf8Path) -> Result<(), PortalError> {
        let content =
            serde_json::to_vec(self).map_err(|err| PortalError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path, &content)
    }
}

/// Checked `n_obs * n_vars`. Dimensions arrive from uploads, so an
/// overflowing product is a shape error, not a panic.
fn cell_count(n_obs: usize, n_vars: usize) -> Result<usize, PortalError> {
    n_obs.checked_mul(n_vars).ok_or_else(|| {
        PortalError::Shape(format!("{n_obs} x {n_vars} overflows the cell count"))
    })
}

impl fmt::Display for AnnMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AnnMatrix object with n_obs x n_vars = {} x {}",
            self.n_obs, self.n_vars
        )?;
        let sections: [(&str, Vec<&String>); 6] = [
            ("obs", self.obs.keys().collect()),
            ("var", self.var.keys().collect()),
            ("uns", self.uns.keys().collect()),
            ("layers", self.layers.keys().collect()),
            ("obsm", self.obsm.keys().collect()),
            ("varm", self.varm.keys().collect()),
        ];
        for (name, keys) in sections {
            if keys.is_empty() {
                continue;
            }
            let joined = keys
                .iter()
                .map(|key| format!("'{key}'"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "\n    {name}: {joined}")?;
        }
        Ok(())
    }
}
