use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use console::style;
use log::info;
use scombat::data_structs::DesignModel;
use scombat::tools::correct::{
    BatchCorrector, CombatCorrector, RegressionCorrector,
};

use crate::utils::{read_matrix, read_metadata, write_matrix};

#[derive(Debug, Clone, ValueEnum)]
enum Method {
    Combat,
    Regression,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct CorrectArgs {
    #[arg(help = "Path of the input expression CSV.")]
    input: PathBuf,
    #[arg(
        short,
        long,
        required = true,
        help = "Path of the sample metadata CSV."
    )]
    metadata: PathBuf,
    #[arg(
        short,
        long,
        required = true,
        help = "Path for the corrected output CSV."
    )]
    output: PathBuf,
    #[clap(long, value_enum, default_value = "combat", help = "Correction method.")]
    method: Method,
    #[arg(
        long,
        default_value = "batch",
        help = "Categorical variable to correct for."
    )]
    batch: String,
    #[arg(
        long,
        help = "Covariates whose signal the batch correction must preserve."
    )]
    preserve: Vec<String>,
    #[arg(
        long,
        default_value = "rin",
        help = "Continuous covariate removed by the regression method."
    )]
    covariate: String,
}

impl CorrectArgs {
    pub fn run(&self) -> Result<()> {
        let matrix = read_matrix(&self.input)?;
        let metadata = read_metadata(&self.metadata)?;

        let corrected = match self.method {
            Method::Combat => {
                info!(
                    "Correcting for '{}' preserving {:?}",
                    self.batch, self.preserve
                );
                CombatCorrector::new().correct(
                    &matrix,
                    &metadata,
                    &self.batch,
                    &DesignModel::preserving(self.preserve.clone()),
                )?
            },
            Method::Regression => {
                info!("Removing covariate '{}'", self.covariate);
                RegressionCorrector::new(self.covariate.clone())
                    .correct(&matrix, &metadata)?
            },
        };

        write_matrix(&corrected, &self.output)?;
        println!(
            "{} {}",
            style("Corrected matrix written to").green().bold(),
            self.output.display()
        );
        Ok(())
    }
}
