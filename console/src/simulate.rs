use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use log::info;
use scombat::tools::simulate::{simulate, SimulationConfig};

use crate::utils::{write_matrix, write_metadata};

#[derive(Args, Debug, Clone)]
pub(crate) struct SimulateArgs {
    #[arg(
        short,
        long,
        required = true,
        help = "Directory for the generated CSV files."
    )]
    output: PathBuf,
    #[arg(short, long, default_value_t = 2016, help = "Random seed.")]
    seed: u64,
    #[arg(
        short = 'n',
        long,
        default_value_t = 10,
        help = "Number of samples."
    )]
    samples: usize,
    #[arg(short = 'g', long, default_value_t = 20, help = "Number of genes.")]
    genes: usize,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Scale of the additive batch shift."
    )]
    noise_scale: f64,
}

impl SimulateArgs {
    pub fn run(&self) -> Result<()> {
        let config = SimulationConfig::new(
            self.samples,
            self.genes,
            self.seed,
            self.noise_scale,
        );
        let dataset = simulate(&config)?;

        fs::create_dir_all(&self.output).with_context(|| {
            format!("could not create '{}'", self.output.display())
        })?;
        write_matrix(&dataset.clean, &self.output.join("clean.csv"))?;
        write_matrix(
            &dataset.batch_noisy,
            &self.output.join("batch_noisy.csv"),
        )?;
        write_matrix(
            &dataset.covariate_noisy,
            &self.output.join("covariate_noisy.csv"),
        )?;
        write_metadata(&dataset.metadata, &self.output.join("metadata.csv"))?;

        info!(
            "Wrote {} samples x {} genes to {}",
            self.samples,
            self.genes,
            self.output.display()
        );
        println!(
            "{} clean.csv, batch_noisy.csv, covariate_noisy.csv, \
             metadata.csv",
            style("Generated:").green().bold()
        );
        Ok(())
    }
}
