mod args;
mod cvr;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use snafu::{ErrorCompat, OptionExt};

use crate::args::Args;
use crate::cvr::config_reader::{read_config, FileSource, RunConfig};
use crate::cvr::{CvrResult, MissingParentDirSnafu, RunOptions};

/// The configuration of the run: the configuration file, if any, updated with
/// the command line arguments. Also returns the directory of the relative paths.
fn build_config(args: &Args) -> CvrResult<(RunConfig, String)> {
    let (mut config, root_dir) = match args.config.as_ref() {
        Some(path) => {
            let config = read_config(path)?;
            let root = Path::new(path).parent().context(MissingParentDirSnafu {})?;
            (config, root.display().to_string())
        }
        None => (
            RunConfig {
                source: "default".to_string(),
                cvr_database: None,
                report_database: None,
                election_date: None,
                batch_size: None,
                cvr_file_sources: Vec::new(),
                contest_reports: Vec::new(),
                election_wide: None,
            },
            ".".to_string(),
        ),
    };

    if let Some(input) = args.input.as_ref() {
        config.cvr_file_sources = vec![FileSource {
            provider: args.input_type.clone().unwrap_or_else(|| "xml".to_string()),
            file_path: input.clone(),
            contest_name: args.contest.clone(),
            contest_id: None,
            vote_prefix: None,
            id_field: None,
        }];
    }
    if let Some(source) = args.source.as_ref() {
        config.source = source.clone();
    }
    if let Some(db) = args.cvr_db.as_ref() {
        config.cvr_database = Some(db.clone());
    }
    if let Some(db) = args.report_db.as_ref() {
        config.report_database = Some(db.clone());
    }
    if let Some(date) = args.date.as_ref() {
        config.election_date = Some(date.clone());
    }
    if let Some(n) = args.batch_size {
        config.batch_size = Some(n);
    }
    Ok((config, root_dir))
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install the interrupt handler: {}", e);
    }

    let res = build_config(&args).and_then(|(config, root_dir)| {
        let options = RunOptions {
            reset_source: args.reset_source,
            skip_ingest: args.skip_ingest,
            out: args.out.clone(),
            reference: args.reference.clone(),
            interrupted,
        };
        cvr::run(&config, Path::new(&root_dir), &options)
    });

    match res {
        Ok(summary) if summary.interrupted => {
            warn!("Interrupted before the analysis");
            std::process::exit(130);
        }
        Ok(summary) => {
            info!("Processed {} contests", summary.contests.len());
        }
        Err(e) => {
            eprintln!("An error occured {}", e);
            if let Some(bt) = ErrorCompat::backtrace(&e) {
                eprintln!("trace: {}", bt);
            }
            std::process::exit(1);
        }
    }
}
