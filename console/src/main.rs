mod correct;
mod simulate;
mod stats;
mod utils;

use clap::{Parser, Subcommand};
use correct::CorrectArgs;
use simulate::SimulateArgs;
use stats::StatsArgs;
use utils::UtilsArgs;
use wild::ArgsOs;

#[derive(Parser, Debug)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None,)]
struct Cli {
    #[command(subcommand)]
    command: MainMenu,
}

#[derive(Subcommand, Debug)]
enum MainMenu {
    #[command(about = "Generate a synthetic expression dataset with known \
                       batch and covariate noise.")]
    Simulate {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  SimulateArgs,
    },

    #[command(about = "Correct an expression matrix for a batch variable or \
                       a continuous covariate.")]
    Correct {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  CorrectArgs,
    },

    #[command(about = "Compare batch divergence before and after a \
                       correction.")]
    Stats {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  StatsArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let args: ArgsOs = wild::args_os();
    let cli = Cli::parse_from(args);

    match cli.command {
        MainMenu::Simulate { utils, args } => {
            utils.setup()?;
            args.run()?;
        },
        MainMenu::Correct { utils, args } => {
            utils.setup()?;
            args.run()?;
        },
        MainMenu::Stats { utils, args } => {
            utils.setup()?;
            args.run()?;
        },
    }
    Ok(())
}
