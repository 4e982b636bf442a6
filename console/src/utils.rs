use std::path::Path;

use anyhow::{ensure, Context, Result};
use clap::Args;
use log::LevelFilter;
use ndarray::Array2;
use scombat::data_structs::{ExpressionMatrix, SampleMetadata};

#[derive(Args, Debug, Clone)]
pub(crate) struct UtilsArgs {
    #[arg(
        short,
        long,
        default_value_t = false,
        help = "Enable debug logging."
    )]
    pub verbose: bool,
}

impl UtilsArgs {
    pub fn setup(&self) -> Result<()> {
        let level = if self.verbose {
            LevelFilter::Debug
        }
        else {
            LevelFilter::Info
        };
        pretty_env_logger::formatted_builder()
            .filter_level(level)
            .try_init()
            .context("failed to set up logger")?;
        Ok(())
    }
}

/// Writes an expression matrix as CSV: a `sample` column followed by one
/// column per gene.
pub(crate) fn write_matrix(
    matrix: &ExpressionMatrix,
    path: &Path,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("could not create '{}'", path.display()))?;
    let mut header = vec!["sample".to_string()];
    header.extend(matrix.genes().iter().cloned());
    writer.write_record(&header)?;

    for (row, sample) in matrix.samples().iter().enumerate() {
        let mut record = vec![sample.clone()];
        record.extend(
            matrix
                .values()
                .row(row)
                .iter()
                .map(|value| value.to_string()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_matrix(path: &Path) -> Result<ExpressionMatrix> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("could not open '{}'", path.display()))?;
    let genes: Vec<String> = reader
        .headers()?
        .iter()
        .skip(1)
        .map(String::from)
        .collect();

    let mut samples = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        let sample = record
            .get(0)
            .unwrap_or_default()
            .to_string();
        let values: Vec<f64> = record
            .iter()
            .skip(1)
            .map(|field| {
                field.parse::<f64>().with_context(|| {
                    format!(
                        "non-numeric expression value '{}' for sample '{}'",
                        field, sample
                    )
                })
            })
            .collect::<Result<_>>()?;
        ensure!(
            values.len() == genes.len(),
            "row for sample '{}' has {} values, header names {} genes",
            sample,
            values.len(),
            genes.len()
        );
        samples.push(sample);
        rows.push(values);
    }

    let values = Array2::from_shape_fn((rows.len(), genes.len()), |(i, j)| {
        rows[i][j]
    });
    ExpressionMatrix::new(samples, genes, values)
}

/// Writes sample metadata as CSV: a `sample` column followed by one column
/// per covariate (sorted by name).
pub(crate) fn write_metadata(
    metadata: &SampleMetadata,
    path: &Path,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("could not create '{}'", path.display()))?;
    let names = metadata.column_names();

    let mut header = vec!["sample"];
    header.extend(names.iter());
    writer.write_record(&header)?;

    // Collect every column once; categorical columns render their level
    // names, continuous columns their numbers
    let columns: Vec<Vec<String>> = names
        .iter()
        .map(|name| {
            match metadata.continuous(name) {
                Ok(values) => {
                    Ok(values
                        .iter()
                        .map(|value| value.to_string())
                        .collect())
                },
                Err(_) => {
                    let label = metadata.categorical(name)?;
                    Ok(label
                        .codes()
                        .iter()
                        .map(|code| label.levels()[*code].clone())
                        .collect())
                },
            }
        })
        .collect::<Result<_>>()?;

    for (row, sample) in metadata.sample_ids().iter().enumerate() {
        let mut record = vec![sample.clone()];
        record.extend(columns.iter().map(|column| column[row].clone()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads sample metadata back from CSV. A column whose every value parses
/// as a number becomes continuous; anything else is categorical.
pub(crate) fn read_metadata(path: &Path) -> Result<SampleMetadata> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("could not open '{}'", path.display()))?;
    let names: Vec<String> = reader
        .headers()?
        .iter()
        .skip(1)
        .map(String::from)
        .collect();

    let mut samples = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); names.len()];
    for record in reader.records() {
        let record = record?;
        samples.push(
            record
                .get(0)
                .unwrap_or_default()
                .to_string(),
        );
        ensure!(
            record.len() == names.len() + 1,
            "metadata row {} has {} fields, header names {}",
            samples.len(),
            record.len(),
            names.len() + 1
        );
        for (column, field) in columns
            .iter_mut()
            .zip(record.iter().skip(1))
        {
            column.push(field.to_string());
        }
    }

    let mut metadata = SampleMetadata::new(samples)?;
    for (name, column) in names.iter().zip(columns) {
        let numeric: Option<Vec<f64>> = column
            .iter()
            .map(|field| field.parse::<f64>().ok())
            .collect();
        metadata = match numeric {
            Some(values) => metadata.with_continuous(name.clone(), values)?,
            None => metadata.with_categorical(name.clone(), column)?,
        };
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use scombat::tools::simulate::{simulate, SimulationConfig};

    use super::*;

    #[test]
    fn test_matrix_roundtrip() {
        let dataset = simulate(&SimulationConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.csv");

        write_matrix(&dataset.clean, &path).unwrap();
        let restored = read_matrix(&path).unwrap();

        assert_eq!(restored.samples(), dataset.clean.samples());
        assert_eq!(restored.genes(), dataset.clean.genes());
        for (restored, original) in restored
            .values()
            .iter()
            .zip(dataset.clean.values())
        {
            assert!((restored - original).abs() < 1e-12);
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let dataset = simulate(&SimulationConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.csv");

        write_metadata(&dataset.metadata, &path).unwrap();
        let restored = read_metadata(&path).unwrap();

        assert_eq!(restored.sample_ids(), dataset.metadata.sample_ids());
        assert_eq!(
            restored.categorical("batch").unwrap(),
            dataset.metadata.categorical("batch").unwrap()
        );
        assert_eq!(
            restored.continuous("rin").unwrap(),
            dataset.metadata.continuous("rin").unwrap()
        );
    }

    #[test]
    fn test_read_matrix_rejects_non_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        std::fs::write(&path, "sample,G1\nS1,not-a-number\n").unwrap();
        let err = read_matrix(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("non-numeric"));
    }
}
