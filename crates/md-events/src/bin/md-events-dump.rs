use std::io::{self, Read, Write};

use md_events::{Event, Session};
use tracing::error;
use tracing_subscriber::EnvFilter;

struct Args {
    chunk: Option<usize>,
    json: bool,
}

impl Args {
    fn parse(args: &[String]) -> Self {
        let mut res = Args {
            chunk: None,
            json: false,
        };

        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];

            if arg == "--json" {
                res.json = true;
            } else if arg == "--chunk" {
                i += 1;
                match args.get(i).map(|n| n.parse::<usize>()) {
                    Some(Ok(n)) if n > 0 => res.chunk = Some(n),
                    _ => error!("--chunk needs a positive byte count"),
                }
            } else {
                error!("unrecognized argument {}", arg);
            }

            i += 1;
        }

        res
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(err) = run(Args::parse(&args)) {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;

    let mut session = Session::new(Vec::<Event>::new());
    session.start()?;
    let chunk = args.chunk.unwrap_or(input.len().max(1));
    for fragment in input.chunks(chunk) {
        session.add_bytes(fragment)?;
    }
    session.flush()?;

    let stats = session.stats();
    let mut out = io::stdout().lock();
    for event in session.sink() {
        if args.json {
            writeln!(out, "{}", serde_json::to_string(event)?)?;
        } else {
            writeln!(out, "{:?}", event)?;
        }
    }

    tracing::info!(
        fragments = stats.fragments,
        bytes = stats.bytes_consumed,
        text_bytes = stats.text_bytes_emitted,
        "done"
    );
    Ok(())
}
