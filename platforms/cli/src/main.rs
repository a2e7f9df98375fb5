use anyhow::{bail, Context, Result};
use beaver::simulator::{Execution, Step};
use beaver::{
    parse, CheckpointStore, ConfigWatcher, Enumerator, MachineDescriptor, Scheduler,
    SearchConfig, Simulator, Source,
};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(author, version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a checkpointed search; type pause, resume or stop on stdin to control it
    Search(SearchArgs),
    /// Simulate a single machine given in notation, e.g. 1RB1LB_1LA1RZ
    Simulate {
        machine: String,

        /// Maximum number of steps
        #[clap(short = 'l', long, default_value_t = 1_000_000)]
        step_limit: u64,

        /// Stop early when the machine repeats a configuration
        #[clap(short, long)]
        cycle_check: bool,

        /// Print each step of the execution
        #[clap(short = 'd', long)]
        trace: bool,
    },
    /// Print a machine's transition table, by notation or by position in its class
    Inspect {
        machine: Option<String>,

        #[clap(short, long)]
        states: Option<usize>,

        #[clap(short = 'k', long)]
        symbols: Option<usize>,

        #[clap(short, long)]
        position: Option<u64>,
    },
    /// List the machines of a class in enumeration order
    Enumerate {
        #[clap(short, long)]
        states: usize,

        #[clap(short = 'k', long)]
        symbols: usize,

        /// Position to start from
        #[clap(long, default_value_t = 0)]
        cursor: u64,

        #[clap(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Print the saved checkpoint of a search
    Status(SearchArgs),
}

#[derive(Args)]
struct SearchArgs {
    /// JSON configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(short, long)]
    states: Option<usize>,

    #[clap(short = 'k', long)]
    symbols: Option<usize>,

    /// Search a pool file instead of a whole class
    #[clap(long)]
    pool: Option<PathBuf>,

    #[clap(short = 'l', long)]
    step_limit: Option<u64>,

    #[clap(short, long)]
    batch_size: Option<usize>,

    /// Directory for logs and checkpoints
    #[clap(short, long)]
    output: Option<PathBuf>,
}

impl SearchArgs {
    fn config(&self) -> Result<SearchConfig> {
        let mut config = match &self.config {
            Some(path) => SearchConfig::load(path)?,
            None => SearchConfig::default(),
        };

        if let Some(states) = self.states {
            config.states = states;
        }
        if let Some(symbols) = self.symbols {
            config.symbols = symbols;
        }
        if let Some(pool) = &self.pool {
            config.pool = Some(pool.clone());
        }
        if let Some(step_limit) = self.step_limit {
            config.step_limit = step_limit;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(output) = &self.output {
            config.output_directory = output.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Search(args) => search(&args),
        Commands::Simulate {
            machine,
            step_limit,
            cycle_check,
            trace,
        } => simulate(&machine, step_limit, cycle_check, trace),
        Commands::Inspect {
            machine,
            states,
            symbols,
            position,
        } => inspect(machine, states, symbols, position),
        Commands::Enumerate {
            states,
            symbols,
            cursor,
            count,
        } => {
            let enumerator = Enumerator::new(states, symbols)?;
            for (position, machine) in enumerator.iter_from(cursor).take(count) {
                println!("{position:>12}  {machine}");
            }
            Ok(())
        }
        Commands::Status(args) => status(&args),
    }
}

fn search(args: &SearchArgs) -> Result<()> {
    let config = args.config()?;
    let hot_reload = config.hot_reload;

    let mut scheduler = Scheduler::from_config(config)?;
    if let (true, Some(path)) = (hot_reload, &args.config) {
        scheduler = scheduler.with_config_watcher(ConfigWatcher::new(path));
    }

    let controller = scheduler.controller();
    if atty::is(atty::Stream::Stdin) {
        eprintln!("Type pause, resume or stop and press enter to control the search.");
    }

    thread::spawn(move || {
        for line in io::stdin().lock().lines().map_while(|line| line.ok()) {
            if line.trim().is_empty() {
                continue;
            }
            if let Err(e) = controller.send_str(&line) {
                eprintln!("{e}");
            }
        }
    });

    let record = scheduler.run()?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn simulate(notation: &str, step_limit: u64, cycle_check: bool, trace: bool) -> Result<()> {
    let machine = parse(notation)?;

    if trace {
        let mut execution = Execution::new(&machine);
        println!("Step: 0, State: A, Tape: {}", execution.tape().render());

        while execution.steps() < step_limit {
            let step = execution.step();
            println!(
                "Step: {}, State: {}, Tape: {}",
                execution.steps(),
                beaver::types::state_label(execution.state()),
                execution.tape().render()
            );

            match step {
                Step::Continue => {}
                Step::Halt => {
                    println!("\nMachine halted.");
                    break;
                }
                Step::Error(e) => {
                    println!("\nMachine error: {e}");
                    break;
                }
            }
        }
        println!();
    }

    let candidate = beaver::Candidate {
        position: 0,
        descriptor: machine,
    };
    let result = Simulator::new(step_limit)
        .with_cycle_check(cycle_check)
        .run(&candidate);

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn inspect(
    notation: Option<String>,
    states: Option<usize>,
    symbols: Option<usize>,
    position: Option<u64>,
) -> Result<()> {
    let machine: MachineDescriptor = match (notation, states, symbols, position) {
        (Some(notation), _, _, _) => parse(&notation)?,
        (None, Some(states), Some(symbols), Some(position)) => {
            Enumerator::new(states, symbols)?.decode(position)?
        }
        _ => bail!("Give a machine in notation, or --states, --symbols and --position"),
    };

    println!("{}", machine.table_view());
    println!("Notation:     {machine}");
    println!("Ruleset hash: {}", machine.ruleset_hash());

    match machine.validate() {
        Ok(()) => {
            let enumerator = Enumerator::new(machine.states(), machine.symbols())?;
            let position = enumerator.encode(&machine)?;
            let canonical = enumerator.canonical_position(&machine)?;
            println!("Position:     {position}");
            println!("Canonical:    {canonical}");
        }
        Err(e) => println!("Malformed:    {e}"),
    }

    Ok(())
}

fn status(args: &SearchArgs) -> Result<()> {
    let config = args.config()?;
    let name = config.source()?.name();
    let path = config.checkpoint_path(&name);

    let record = CheckpointStore::new(&path)
        .read()?
        .with_context(|| format!("No checkpoint at {}", path.display()))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
