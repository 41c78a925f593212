use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hydrodp::dispatch::DispatchSolution;
use hydrodp::recorders::{self, CsvRecorder, SolutionPrinter, SolutionRecorder};
use hydrodp::schema::PlantSchema;
use hydrodp::script::ScriptRunner;
use hydrodp::solver::DpSolver;
use hydrodp::test_utils::make_random_plant;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra diagnostic detail.
    #[arg(short = 'D', long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command script from a file.
    Run {
        script: PathBuf,
        /// Output column delimiter (use ',' for spreadsheet import).
        #[arg(short, long)]
        delimiter: Option<char>,
        /// Transpose printed tables to vertical layout.
        #[arg(short, long, default_value_t = false)]
        transpose: bool,
        /// Define a symbol tested by skiptoif branching.
        #[arg(short = 'S', long)]
        symbol: Vec<String>,
        /// Also write the final solution as CSV.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Solve a JSON plant definition.
    RunJson {
        model: PathBuf,
        /// Also write the solution as CSV.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Solve a randomly generated plant.
    RunRandom { num_units: usize, seed: u64 },
    /// Read commands interactively from stdin.
    Interactive,
}

fn setup_tracing(debug: bool) -> Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer();

    let filter_level = if debug { "hydrodp=debug" } else { "hydrodp=info" };

    let filter = EnvFilter::from_default_env()
        .add_directive(filter_level.parse()?)
        // only display error logs from other crates
        .add_directive("error".parse()?);

    let subscriber = Registry::default().with(stdout_layer).with(filter);
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.debug)?;

    match cli.command {
        Some(Commands::Run {
            script,
            delimiter,
            transpose,
            symbol,
            output,
        }) => run_script(&script, delimiter, transpose, &symbol, output.as_deref(), cli.debug),
        Some(Commands::RunJson { model, output }) => run_json(&model, output.as_deref()),
        Some(Commands::RunRandom { num_units, seed }) => run_random(num_units, seed),
        Some(Commands::Interactive) => interactive(cli.debug),
        None => Ok(()),
    }
}

fn run_script(
    path: &Path,
    delimiter: Option<char>,
    transpose: bool,
    symbols: &[String],
    output: Option<&Path>,
    debug: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("unable to open file `{}`", path.display()))?;

    let mut runner = ScriptRunner::new(std::io::stdout());
    if let Some(delimiter) = delimiter {
        runner.set_delimiter(delimiter);
    }
    runner.set_transpose(transpose);
    runner.set_debug(debug);
    for symbol in symbols {
        runner.define_symbol(symbol);
    }

    runner
        .run(&text)
        .with_context(|| format!("script `{}` failed", path.display()))?;

    if let Some(output) = output {
        let mut recorder = CsvRecorder::new("solution", output);
        recorder.save(runner.model(), runner.solver())?;
    }
    Ok(())
}

fn run_json(path: &Path, output: Option<&Path>) -> Result<()> {
    let data = std::fs::read_to_string(path).with_context(|| format!("unable to open file `{}`", path.display()))?;
    let schema = PlantSchema::from_json(&data)?;
    let dispatch_demand = schema.dispatch;

    let mut model = schema.try_into_model()?;
    let mut solver = DpSolver::new();
    solver.run(&mut model)?;

    let mut printer = SolutionPrinter::new(std::io::stdout());
    printer.save(&model, &solver)?;

    if let Some(demand) = dispatch_demand {
        let dispatch = DispatchSolution::from_solution(&solver, demand)?;
        let mode = solver.mode().expect("mode is set after a successful solve");
        recorders::print_dispatch(&mut std::io::stdout(), mode, &dispatch, ' ', false)?;
    }

    if let Some(output) = output {
        let mut recorder = CsvRecorder::new("solution", output);
        recorder.save(&model, &solver)?;
    }
    Ok(())
}

fn run_random(num_units: usize, seed: u64) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut model = make_random_plant(num_units, &mut rng)?;
    model.set_solve_mode(hydrodp::model::SolveMode::ForPower);

    let mut solver = DpSolver::new();
    solver.run(&mut model)?;

    let mut printer = SolutionPrinter::new(std::io::stdout());
    printer.save(&model, &solver)?;
    Ok(())
}

fn interactive(debug: bool) -> Result<()> {
    let mut runner = ScriptRunner::new(std::io::stdout());
    runner.set_debug(debug);

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if let Err(e) = runner.run(&line) {
            // report and await further commands
            eprintln!("{}", e);
        }
        if runner.has_ended() {
            break;
        }
    }
    Ok(())
}
