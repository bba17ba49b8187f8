use std::cmp;
use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Arg, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hprof_inspect::analysis::{self, CATALOG};
use hprof_inspect::graph::CancelToken;
use hprof_inspect::store::{DecodeOptions, HeapIndex};
use hprof_inspect::{threads, web};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn cli() -> Command {
    Command::new("hprof-inspect")
        .about("Decode a JVM hprof heap dump and answer size, ownership and duplication queries")
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("Heap dump file to read")
                .required(true),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help(
                    "Number of threads for parallel analyses. Defaults to 4 or the \
                     number of cores, whichever is smaller.",
                ),
        )
        .subcommand_negates_reqs(true)
        .subcommand(
            Command::new("stack")
                .about("Print decoded stack traces and reconstructed thread stacks")
                .arg(
                    Arg::new("files")
                        .value_name("FILE")
                        .num_args(1..)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about(format!(
                    "Serve the analysis catalog over HTTP on port {}",
                    web::SERVE_PORT
                ))
                .arg(Arg::new("file").value_name("FILE").required(true)),
        )
}

fn run() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let worker_threads = matches
        .get_one::<usize>("threads")
        .copied()
        // most storage cannot keep more cores than this busy anyway
        .unwrap_or_else(|| cmp::min(num_cpus::get(), 4));
    rayon::ThreadPoolBuilder::new()
        .num_threads(worker_threads)
        .build_global()?;

    match matches.subcommand() {
        Some(("stack", sub)) => {
            let mut failures = 0_u32;
            for path in sub.get_many::<String>("files").expect("files are required") {
                if let Err(e) = dump_stacks(path) {
                    eprintln!("problem with {}: {:#}", path, e);
                    failures += 1;
                }
            }
            if failures > 0 {
                anyhow::bail!("{} file(s) could not be processed", failures);
            }
            Ok(())
        }
        Some(("serve", sub)) => {
            let path = sub.get_one::<String>("file").expect("file is required");
            let index = ingest(path)?;
            web::serve(index)
        }
        _ => {
            let path = matches.get_one::<String>("file").expect("file is required");
            let index = ingest(path)?;
            interactive(&index)
        }
    }
}

/// Map the dump, decode it into a store, and release the file.
fn ingest(path: &str) -> anyhow::Result<HeapIndex> {
    let file = fs::File::open(path).with_context(|| format!("cannot open {}", path))?;
    let mmap =
        unsafe { memmap2::Mmap::map(&file) }.with_context(|| format!("cannot map {}", path))?;

    let hprof = hprof_inspect::parse_hprof(&mmap)?;
    let header = hprof.header();
    let timestamp = chrono::DateTime::from_timestamp_millis(header.timestamp_millis())
        .map(|t| t.to_string())
        .unwrap_or_else(|| "(invalid timestamp)".to_owned());
    info!(
        file = path,
        id_size = header.id_size().size_in_bytes(),
        timestamp = %timestamp,
        "decoding heap dump"
    );

    let index = HeapIndex::from_hprof(&hprof, &DecodeOptions::default())?;
    let stats = index.stats();
    info!(
        classes = stats.class_dumps,
        instances = stats.instances,
        object_arrays = stats.object_arrays,
        primitive_arrays = stats.primitive_arrays,
        gc_roots = stats.gc_roots,
        corrupt_segments = stats.corrupt_segments,
        "snapshot decoded"
    );
    Ok(index)
}

fn dump_stacks(path: &str) -> anyhow::Result<()> {
    let index = ingest(path)?;
    println!("{}", threads::stack_trace_report(&index).render_text());
    println!("{}", threads::thread_stack_report(&index).render_text());
    Ok(())
}

fn interactive(index: &HeapIndex) -> anyhow::Result<()> {
    println!("Available commands:");
    for spec in CATALOG {
        println!("  {}. {}", spec.number, spec.name);
    }
    println!("  -1. quit");

    let cancel = CancelToken::new();
    loop {
        let number = match prompt_number("Enter command number (-1 to quit): ")? {
            Some(n) => n,
            None => break,
        };
        if number == -1 {
            break;
        }

        let spec = match analysis::command_spec(number as i32) {
            Some(spec) => spec,
            None => {
                eprintln!("unknown command {}", number);
                continue;
            }
        };

        let option = match spec.prompt {
            Some(prompt) => match prompt_number(&format!("Enter {}: ", prompt))? {
                Some(v) => Some(v),
                None => break,
            },
            None => None,
        };

        let command = match analysis::Command::from_number(spec.number, option) {
            Some(command) => command,
            None => {
                eprintln!("invalid option for {}", spec.name);
                continue;
            }
        };

        match command.run(index, &cancel) {
            Ok(result) => println!("{}", result.render_text()),
            Err(e) => eprintln!("analysis failed: {}", e),
        }
    }
    Ok(())
}

/// Prompt until a number is entered; `None` means stdin was closed.
fn prompt_number(prompt: &str) -> anyhow::Result<Option<i64>> {
    loop {
        print!("{}", prompt);
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match line.trim().parse::<i64>() {
            Ok(v) => return Ok(Some(v)),
            Err(_) => eprintln!("please enter a number"),
        }
    }
}
