use anyhow::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use log::debug;
use serde::{Deserialize, Serialize};

/// A single covariate value attached to a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Covariate {
    Categorical(String),
    Continuous(f64),
}

/// Per-sample covariate records, aligned with the rows of an
/// [`ExpressionMatrix`](crate::data_structs::ExpressionMatrix).
///
/// Columns are stored by name; every column covers every sample exactly
/// once. Categorical columns can be read back as a [`BatchLabel`],
/// continuous columns as a plain `Vec<f64>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    columns:    HashMap<String, Vec<Covariate>>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(sample_ids.len());
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                bail!("duplicate sample id '{}'", id);
            }
        }
        drop(seen);
        Ok(Self {
            sample_ids,
            columns: HashMap::new(),
        })
    }

    /// Attaches a categorical covariate column.
    pub fn with_categorical<S: Into<String>>(
        mut self,
        name: S,
        values: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(
            values.len() == self.sample_ids.len(),
            "covariate '{}' has {} values for {} samples",
            name,
            values.len(),
            self.sample_ids.len()
        );
        debug!("Attached categorical covariate '{}'", name);
        self.columns.insert(
            name,
            values
                .into_iter()
                .map(Covariate::Categorical)
                .collect(),
        );
        Ok(self)
    }

    /// Attaches a continuous covariate column.
    pub fn with_continuous<S: Into<String>>(
        mut self,
        name: S,
        values: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(
            values.len() == self.sample_ids.len(),
            "covariate '{}' has {} values for {} samples",
            name,
            values.len(),
            self.sample_ids.len()
        );
        debug!("Attached continuous covariate '{}'", name);
        self.columns.insert(
            name,
            values
                .into_iter()
                .map(Covariate::Continuous)
                .collect(),
        );
        Ok(self)
    }

    pub fn len(&self) -> usize { self.sample_ids.len() }

    pub fn is_empty(&self) -> bool { self.sample_ids.is_empty() }

    pub fn sample_ids(&self) -> &[String] { &self.sample_ids }

    /// Covariate column names in sorted order.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .columns
            .keys()
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn has_column(
        &self,
        name: &str,
    ) -> bool {
        self.columns.contains_key(name)
    }

    fn column(
        &self,
        name: &str,
    ) -> Result<&[Covariate]> {
        match self.columns.get(name) {
            Some(column) => Ok(column),
            None => bail!(
                "metadata has no covariate named '{}' (available: {})",
                name,
                self.column_names().join(", ")
            ),
        }
    }

    /// Reads a categorical column as a batch label.
    pub fn categorical(
        &self,
        name: &str,
    ) -> Result<BatchLabel> {
        let values: Vec<&str> = self
            .column(name)?
            .iter()
            .map(|value| {
                match value {
                    Covariate::Categorical(level) => Ok(level.as_str()),
                    Covariate::Continuous(_) => bail!(
                        "covariate '{}' is continuous, expected categorical",
                        name
                    ),
                }
            })
            .collect::<Result<_>>()?;
        Ok(BatchLabel::from_values(name, &values))
    }

    /// Reads a continuous column as a numeric vector.
    pub fn continuous(
        &self,
        name: &str,
    ) -> Result<Vec<f64>> {
        self.column(name)?
            .iter()
            .map(|value| {
                match value {
                    Covariate::Continuous(x) => Ok(*x),
                    Covariate::Categorical(_) => bail!(
                        "covariate '{}' is categorical, expected continuous",
                        name
                    ),
                }
            })
            .collect()
    }
}

/// A categorical partition of samples into named groups.
///
/// Levels are ordered by first appearance and every sample carries the
/// index of its level, so group membership lookups never re-hash strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLabel {
    name:   String,
    levels: Vec<String>,
    codes:  Vec<usize>,
}

impl BatchLabel {
    pub fn from_values(
        name: &str,
        values: &[&str],
    ) -> Self {
        let mut levels: Vec<String> = Vec::new();
        let codes = values
            .iter()
            .map(|value| {
                match levels.iter().position(|level| level == value) {
                    Some(code) => code,
                    None => {
                        levels.push((*value).to_string());
                        levels.len() - 1
                    },
                }
            })
            .collect();
        Self {
            name: name.to_string(),
            levels,
            codes,
        }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn levels(&self) -> &[String] { &self.levels }

    pub fn codes(&self) -> &[usize] { &self.codes }

    pub fn n_levels(&self) -> usize { self.levels.len() }

    pub fn len(&self) -> usize { self.codes.len() }

    pub fn is_empty(&self) -> bool { self.codes.is_empty() }

    /// Sample indices belonging to the given level.
    pub fn level_indices(
        &self,
        level: usize,
    ) -> Vec<usize> {
        self.codes
            .iter()
            .enumerate()
            .filter_map(|(sample, code)| (*code == level).then_some(sample))
            .collect()
    }

    pub fn level_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.levels.len()];
        for code in &self.codes {
            sizes[*code] += 1;
        }
        sizes
    }
}
