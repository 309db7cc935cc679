use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

use logtriage::analyser::{Analyser, LogAnalyser};
use logtriage::classifier::Classifier;
use logtriage::config::{Settings, DEFAULT_LINE_BUDGET, DEFAULT_MODELS_DIR, DEFAULT_REMOTE_MODEL};
use logtriage::labels::{auto_label, baseline_report, read_table, write_table};
use logtriage::normalize::decode_lossy;
use logtriage::registry::ModelRegistry;
use logtriage::remote::RemoteAnalyser;
use logtriage::report::{LabelReport, TrainReport};
use logtriage::trainer::{Trainer, TrainingJob};

fn init_parallelism() {
    static START: Once = Once::new();
    START.call_once(|| {
        let n = num_cpus::get();
        let _ = rayon::ThreadPoolBuilder::new().num_threads(n).build_global();
    });
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[derive(Parser, Debug)]
#[command(name = "logtriage", version, about = "Anomaly detection and failure labeling for CI logs")]
struct Cli {
    /// Directory holding model bundles
    #[arg(long = "models-dir", env = "LOGTRIAGE_MODELS_DIR", default_value = DEFAULT_MODELS_DIR, global = true)]
    models_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train an anomaly model on clean logs (`-` for stdin)
    Train {
        #[arg(required = false)]
        input: Vec<String>,
        #[arg(long, default_value_t = 0.05)]
        contamination: f64,
        #[arg(long = "ensemble-size", default_value_t = 100)]
        ensemble_size: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Abort when the corpus has more lines than this
        #[arg(long = "line-budget", default_value_t = DEFAULT_LINE_BUDGET)]
        line_budget: usize,
    },
    /// Train the failure classifier from a labeled-line table
    TrainClassifier {
        table: PathBuf,
        #[arg(long, default_value_t = 400)]
        trees: usize,
        #[arg(long = "max-depth", default_value_t = 30)]
        max_depth: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Flag anomalous lines in a log
    Analyse {
        #[arg(required = false)]
        input: Vec<String>,
        #[arg(long, value_enum, default_value_t = Mode::Local)]
        mode: Mode,
        /// Also label lines with the classifier and failure rules
        #[arg(long, default_value_t = false)]
        classify: bool,
        #[arg(long = "openai-key", env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_key: Option<String>,
        #[arg(long = "remote-model", default_value = DEFAULT_REMOTE_MODEL)]
        remote_model: String,
    },
    /// List published model bundles
    Models,
    /// Build or extend the labeled-line table from raw logs
    Label {
        #[arg(required = true)]
        input: Vec<String>,
        #[arg(long, default_value = "data/labels.csv")]
        out: PathBuf,
        /// Keep the rows already in `--out`
        #[arg(long, default_value_t = false)]
        inplace: bool,
    },
    /// Score the regex baseline against the labeled-line table
    Baseline {
        #[arg(required = true)]
        input: Vec<String>,
        #[arg(long, default_value = "data/labels.csv")]
        table: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Local,
    Remote,
}

/// Reads every input as one text blob; no inputs means stdin. Bytes that are
/// not UTF-8 are dropped.
fn read_inputs(paths: &[String]) -> anyhow::Result<Vec<String>> {
    let paths: Vec<String> = if paths.is_empty() {
        if atty::is(atty::Stream::Stdin) {
            bail!("no input files given and stdin is a terminal");
        }
        vec!["-".to_string()]
    } else {
        paths.to_vec()
    };
    let mut out = Vec::with_capacity(paths.len());
    for p in &paths {
        let mut bytes = Vec::new();
        if p == "-" {
            io::stdin().lock().read_to_end(&mut bytes)?;
        } else {
            File::open(p)
                .and_then(|mut f| f.read_to_end(&mut bytes))
                .with_context(|| format!("reading {p}"))?;
        }
        out.push(decode_lossy(&bytes));
    }
    Ok(out)
}

/// Waits for a training job while Ctrl-C requests its abort.
fn run_job(job: TrainingJob) -> anyhow::Result<TrainReport> {
    let flag = job.cancel_flag();
    let _ = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    });
    Ok(job.wait()?)
}

fn main() -> anyhow::Result<()> {
    init_logging();
    init_parallelism();
    let cli = Cli::parse();

    let registry = Arc::new(
        ModelRegistry::open(&cli.models_dir)
            .with_context(|| format!("opening model directory {}", cli.models_dir.display()))?,
    );
    let mut settings = Settings { models_dir: cli.models_dir.clone(), ..Settings::default() };

    match cli.command {
        Command::Train { input, contamination, ensemble_size, seed, line_budget } => {
            settings = settings.with_seed(seed);
            settings.anomaly.contamination = contamination;
            settings.anomaly.ensemble_size = ensemble_size;
            settings.line_budget = line_budget;
            let texts = read_inputs(&input)?;
            let trainer = Trainer::new(registry, settings);
            let report = run_job(trainer.spawn_train(texts)?)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::TrainClassifier { table, trees, max_depth, seed } => {
            settings = settings.with_seed(seed);
            settings.classifier.tree_count = trees;
            settings.classifier.max_depth = max_depth;
            let rows = read_table(&table).with_context(|| format!("reading {}", table.display()))?;
            let trainer = Trainer::new(registry, settings);
            let report = run_job(trainer.spawn_train_classifier(rows)?)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Analyse { input, mode, classify, openai_key, remote_model } => {
            let text = read_inputs(&input)?.join("\n");
            let classifier = classify.then(|| Classifier::new(Arc::clone(&registry)));
            let report = match mode {
                Mode::Local => Analyser::new(Arc::clone(&registry)).analyse_with(&text, classifier.as_ref())?,
                Mode::Remote => RemoteAnalyser::openai(openai_key)?
                    .with_model(remote_model)
                    .analyse_with(&text, classifier.as_ref())?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Models => {
            let trainer = Trainer::new(registry, settings);
            println!("{}", serde_json::to_string_pretty(&trainer.list_models()?)?);
        }
        Command::Label { input, out, inplace } => {
            let texts = read_inputs(&input)?;
            let existing = if inplace && out.exists() { read_table(&out)? } else { Vec::new() };
            let before = existing.len();
            let rows = auto_label(&texts, existing);
            write_table(&out, &rows)?;
            let report = LabelReport { table: out.display().to_string(), rows: rows.len(), added: rows.len() - before };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Baseline { input, table } => {
            let texts = read_inputs(&input)?;
            let rows = read_table(&table).with_context(|| format!("reading {}", table.display()))?;
            println!("{}", serde_json::to_string_pretty(&baseline_report(&texts, &rows)?)?);
        }
    }
    Ok(())
}
