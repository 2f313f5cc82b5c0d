//! Ranks the encoder's learned features against the observed reward.
//!
//! Loads a persisted encoder model, projects a SARS dataset into FA/R arrays
//! (or reloads a cached pair) and runs iterative feature selection with all
//! state-feature columns preloaded, so the first selection round reports the
//! variance the encoder features already explain. The remaining candidate is
//! the action column; the run log states whether it was selected.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use num_format::ToFormattedString;
use rustc_hash::FxHashMap;

use deep_ifs::extraction::conv_net::{ConvNet, ConvNetConfig};
use deep_ifs::log::init_logging;
use ifs::dataset::{build_far, FarArrays, SarsDataset};
use ifs::logger::{timestamped_run_name, RunLogger};
use ifs::prelude::ActionValue;
use ifs::selection::ifs::{Ifs, IfsOptions};
use ifs::util;

#[derive(Parser, Debug)]
#[command(name = "run-ifs-preload", about = "Rank encoder features against reward via IFS")]
struct Cli {
    /// Run with reduced parameters
    #[arg(short, long)]
    debug: bool,

    /// Path to the saved encoder model directory
    #[arg(long, value_name = "PATH")]
    load_ae: PathBuf,

    /// Path to the SARS dataset folder to stream
    #[arg(long, value_name = "PATH")]
    load_sars: Option<PathBuf>,

    /// Binarize input to the neural networks
    #[arg(long)]
    binarize: bool,

    /// Save the FA, R arrays into the run folder
    #[arg(long)]
    save_far: bool,

    /// Load the FA, R arrays from a previous run
    #[arg(long, value_name = "PATH")]
    load_far: Option<PathBuf>,
}

/// Tunables of one pipeline run.
struct Parameter {
    nn_nb_epochs: usize,
    nn_batch_size: usize,
    nn_encoding_dim: usize,
    ifs_nb_trees: usize,
    ifs_significance: f64,
}

impl Parameter {
    fn resolve(debug: bool) -> Self {
        Self {
            nn_nb_epochs: if debug { 5 } else { 300 },
            nn_batch_size: if debug { 6 } else { 32 },
            nn_encoding_dim: 512,
            ifs_nb_trees: 50,
            ifs_significance: 1.0,
        }
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let param = Parameter::resolve(cli.debug);

    let logger = RunLogger::new(Path::new("output"), &timestamped_run_name("ifs_pre_"))?;
    logger.log(&format!("run folder: {}", logger.path().display()));
    logger.log(&format!(
        "parameters: epochs={}, batch_size={}, encoding_dim={}, ifs_trees={}, ifs_significance={}",
        param.nn_nb_epochs,
        param.nn_batch_size,
        param.nn_encoding_dim,
        param.ifs_nb_trees,
        param.ifs_significance
    ));

    logger.log(&format!("loading encoder from {}", cli.load_ae.display()));
    let config = ConvNetConfig {
        encoding_dim: param.nn_encoding_dim,
        binarize: cli.binarize,
        // target is the scalar reward
        ..ConvNetConfig::default()
    };
    let ae = ConvNet::load_model(&cli.load_ae, config)?;
    logger.log(&ae.summary());

    let far = match &cli.load_far {
        Some(path) => {
            logger.log(&format!("loading FA, R from {}", path.display()));
            FarArrays::load(path)?
        }
        None => {
            logger.log("building dataset");
            let sars_path = cli
                .load_sars
                .as_deref()
                .context("please provide a SARS dataset (--load-sars) when no cached FA/R is given")?;
            let sars = SarsDataset::open(sars_path)?;
            logger.log(&format!(
                "{} samples in dataset",
                sars.len_samples()?.to_formatted_string(&util::number_format())
            ));
            log_action_distribution(&logger, &sars)?;

            let far = build_far(&ae, &sars)?;
            if cli.save_far {
                let cache = logger.artifact_path("FA_R.json");
                far.save(&cache)?;
                logger.log(&format!("saved FA, R to {}", cache.display()));
            }
            far
        }
    };

    logger.log("running IFS");
    let mut ifs = Ifs::new(IfsOptions {
        n_estimators: param.ifs_nb_trees,
        n_features_step: 1,
        significance: param.ifs_significance,
        scale: true,
        parallel: true,
        ..IfsOptions::default()
    });
    // All columns but the action are preloaded, so the first round reports
    // the variance explained by the encoder features alone.
    let preload = (0..far.fa.ncols() - 1).collect_vec();
    let report = ifs.fit(far.fa.view(), far.r.view(), &preload)?;

    let got_action = *report.support.last().context("support mask is empty")?;
    let state_support = &report.support[..report.support.len() - 1];
    let selected = state_support
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s)
        .map(|(i, _)| i)
        .collect_vec();

    logger.log(&format!("features: [{}]", selected.iter().join(", ")));
    logger.log(&format!("IFS - new features: {}", selected.len()));
    logger.log(&format!(
        "action was{} selected",
        if got_action { "" } else { " NOT" }
    ));
    logger.log(&format!(
        "R2 per round: [{}]",
        report.round_scores.iter().map(|s| format!("{s:.4}")).join(", ")
    ));

    Ok(())
}

/// Logs how often each action occurs in the dataset.
fn log_action_distribution(logger: &RunLogger, sars: &SarsDataset) -> Result<()> {
    let mut counts = FxHashMap::<ActionValue, usize>::default();
    let mut total = 0usize;
    for transition in sars.stream() {
        *counts.entry(transition?.action).or_insert(0) += 1;
        total += 1;
    }
    let line = counts
        .iter()
        .sorted()
        .map(|(action, count)| format!("{} {:.1}%", action, 100.0 * *count as f32 / total as f32))
        .join(", ");
    logger.log(&format!("action distribution: {line}"));
    Ok(())
}
