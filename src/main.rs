use crossotope::external::ProcessRunner;
use crossotope::process::{
    create_rois, run_analysis, AnalysisOptions, Args, Commands, CrossotopeError, RoiOptions,
};
use crossotope::sampler::Sampler;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::process;
use std::time::Duration;

fn main() {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    Builder::new().filter_level(level).parse_default_env().init();

    let command = match args.command {
        Some(ref command) => command,
        None => {
            // No subcommand: show help and leave quietly
            let _ = Args::command().print_help();
            println!();
            process::exit(0);
        }
    };

    if let Err(err) = run(&args, command) {
        eprintln!("{}", format!("ERROR: {}", err).red());
        process::exit(1);
    }
}

fn run(args: &Args, command: &Commands) -> Result<(), CrossotopeError> {
    let runner = ProcessRunner::new(args.timeout.map(Duration::from_secs));

    match command {
        Commands::Roi(roi_args) => {
            let options = RoiOptions::from_args(roi_args, &args.cwd);
            let summary = create_rois(&options, &runner)?;
            println!(
                "{}",
                format!(
                    "Created {} label files in {} (removed {} intermediates)",
                    summary.label_files,
                    summary.output_dir.display(),
                    summary.removed_intermediates
                )
                .green()
            );
        }
        Commands::Analysis(analysis_args) => {
            let options = AnalysisOptions::from_args(analysis_args, &args.cwd);
            let mut sampler = Sampler::from_option(analysis_args.seed);
            let output = run_analysis(&options, &runner, &mut sampler)?;
            info!("Results written to {}", output.display());
            println!("{}", "Analysis complete.".green());
        }
    }
    Ok(())
}
