use std::env;

use arrow::util::pretty::pretty_format_batches;
use sysproc_client::demo::{demo_catalog, load_demo_data};
use sysproc_client::repl::run_repl;
use sysproc_client::{Engine, ProcedureCall};
use sysproc_common::ClusterConfig;
use sysproc_procedures::UnknownResponsePolicy;
use sysproc_storage::Catalog;
use tracing_subscriber::EnvFilter;

const DEFAULT_DEMO_ROWS: u64 = 10_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();

    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty()
        || args
            .first()
            .map(|a| a == "--help" || a == "-h")
            .unwrap_or(false)
    {
        print_usage();
        return Ok(());
    }

    let opts = parse_opts(&args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let engine = build_engine(&opts)?;

    match &opts.command {
        Command::Repl => {
            eprintln!("sysproc REPL over {} host(s) (type \\q to quit)", opts.config.host_count);
            let stdin = std::io::stdin();
            run_repl(&engine, &runtime, stdin.lock(), std::io::stdout())?;
        }
        Command::Call(words) => {
            let call =
                ProcedureCall::parse(&words.join(" "), engine.config().chunked_default_chunk_size)?;
            if opts.explain {
                println!("{}", engine.explain(&call)?);
            } else {
                let batch = runtime.block_on(engine.call(&call))?;
                println!("{}", pretty_format_batches(&[batch])?);
            }
        }
    }

    if opts.metrics {
        print!("{}", engine.prometheus_metrics());
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum Command {
    Repl,
    Call(Vec<String>),
}

#[derive(Debug, Clone)]
struct CliOpts {
    config: ClusterConfig,
    catalog: Option<String>,
    snapshot_dir: Option<String>,
    demo_rows: u64,
    unknown_policy: UnknownResponsePolicy,
    explain: bool,
    metrics: bool,
    command: Command,
}

fn build_engine(opts: &CliOpts) -> Result<Engine, Box<dyn std::error::Error>> {
    let catalog = match &opts.catalog {
        Some(path) => Catalog::load_from_json(path)?,
        None => demo_catalog(),
    };
    let mut builder = Engine::builder(opts.config.clone())
        .catalog(catalog)
        .unknown_policy(opts.unknown_policy);
    if let Some(dir) = &opts.snapshot_dir {
        builder = builder.snapshot_dir(dir);
    }
    let engine = builder.build()?;
    if opts.catalog.is_none() {
        let loaded = load_demo_data(&engine, opts.demo_rows)?;
        tracing::info!(rows = loaded, "demo data loaded");
    }
    Ok(engine)
}

fn parse_opts(args: &[String]) -> Result<CliOpts, Box<dyn std::error::Error>> {
    let mut config = ClusterConfig::from_env()?;
    let mut catalog = None;
    let mut snapshot_dir = None;
    let mut demo_rows = DEFAULT_DEMO_ROWS;
    let mut unknown_policy = UnknownResponsePolicy::parse(
        &env::var("SYSPROC_ON_UNKNOWN").unwrap_or_else(|_| "fail".to_string()),
    )?;
    let mut explain = false;
    let mut metrics = false;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--hosts" => {
                i += 1;
                config.host_count = value_of(args, i, "--hosts")?.parse()?;
            }
            "--sites-per-host" => {
                i += 1;
                config.sites_per_host = value_of(args, i, "--sites-per-host")?.parse()?;
            }
            "--chunk-size" => {
                i += 1;
                config.chunked_default_chunk_size = value_of(args, i, "--chunk-size")?.parse()?;
            }
            "--timeout-ms" => {
                i += 1;
                config.chunked_timeout_ms = value_of(args, i, "--timeout-ms")?.parse()?;
            }
            "--catalog" => {
                i += 1;
                catalog = Some(value_of(args, i, "--catalog")?);
            }
            "--snapshot-dir" => {
                i += 1;
                snapshot_dir = Some(value_of(args, i, "--snapshot-dir")?);
            }
            "--demo-rows" => {
                i += 1;
                demo_rows = value_of(args, i, "--demo-rows")?.parse()?;
            }
            "--on-unknown" => {
                i += 1;
                unknown_policy = UnknownResponsePolicy::parse(&value_of(args, i, "--on-unknown")?)?;
            }
            "--explain" => {
                explain = true;
            }
            "--metrics" => {
                metrics = true;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => {
                return Err(format!("unknown argument: {flag}").into());
            }
            _ => break,
        }
        i += 1;
    }
    config.validate()?;

    let rest = &args[i..];
    let command = match rest.first().map(|s| s.as_str()) {
        None => return Err("missing procedure; try --help".into()),
        Some("repl") if rest.len() == 1 => Command::Repl,
        Some(_) => Command::Call(rest.to_vec()),
    };
    Ok(CliOpts {
        config,
        catalog,
        snapshot_dir,
        demo_rows,
        unknown_policy,
        explain,
        metrics,
        command,
    })
}

fn value_of(args: &[String], i: usize, flag: &str) -> Result<String, String> {
    args.get(i)
        .cloned()
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn print_usage() {
    eprintln!(
        "Usage:
  sysproc [OPTIONS] <procedure> [ARGS...]
  sysproc [OPTIONS] repl

Procedures:
  statistics TABLE|PARTITIONCOUNT
  row-count TABLE
  nibble-delete TABLE COLUMN OP VALUE [CHUNK]
  migrate-rows SOURCE TARGET COLUMN OP VALUE [CHUNK]
  pause | resume
  update-settings JSON
  snapshot-check PATH NONCE
  check-tables
  update-catalog VERSION PATH [TABLE[+TABLE]...]

Options:
  --hosts N              hosts in the in-process cluster (SYSPROC_HOSTS)
  --sites-per-host N     sites per host (SYSPROC_SITES_PER_HOST)
  --chunk-size N         default chunk size (SYSPROC_CHUNK_SIZE)
  --timeout-ms N         chunked loop budget (SYSPROC_CHUNKED_TIMEOUT_MS)
  --catalog PATH         JSON catalog; without it a demo schema and data are loaded
  --demo-rows N          demo EVENTS rows (default {DEFAULT_DEMO_ROWS})
  --snapshot-dir PATH    base directory for relative snapshot paths
  --on-unknown POLICY    fail|ignore for unknown responses (SYSPROC_ON_UNKNOWN, default fail)
  --explain              print the plan instead of running it
  --metrics              print prometheus metrics afterwards

Logging follows RUST_LOG."
    );
}
