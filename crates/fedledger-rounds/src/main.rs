//! fedledger CLI
//!
//! Runs one round-exchange invocation against a local RocksDB ledger and
//! prints the response as JSON.
//!
//! Usage:
//!   fedledger register
//!   fedledger submit <payload_json> <privacy_budget>
//!   fedledger latest
//!   fedledger select <count> <seed>
//!   fedledger publish <payload_json> <round> [<count> <seed>]
//!   fedledger fetch-result <round>
//!   fedledger request-key <round>
//!   fedledger drain-requests
//!   fedledger issue-key <round> <collection>
//!   fedledger fetch-key <round> <collection>
//!   fedledger state
//!   fedledger history <name>

use std::str::FromStr;

use fedledger_ledger::RocksLedger;
use fedledger_rounds::escrow::{TRANSIENT_IV, TRANSIENT_PASSWORD};
use fedledger_rounds::{
    CliConfig, Error, ExchangeConfig, Invocation, ModelPayload, RoundContract, Sampling, Transient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status when a concurrent commit invalidated the invocation.
const EXIT_CONFLICT: i32 = 2;

fn print_usage() {
    eprintln!("fedledger - Federated-learning round exchange");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  fedledger register                               Register the caller");
    eprintln!("  fedledger submit <payload_json> <budget>         Submit a model update");
    eprintln!("  fedledger latest                                 Show the caller's latest update");
    eprintln!("  fedledger select <count> <seed>                  Sample updates for aggregation");
    eprintln!("  fedledger publish <payload_json> <round> [<count> <seed>]");
    eprintln!("                                                   Publish an aggregate");
    eprintln!("  fedledger fetch-result <round>                   Fetch a round's aggregate");
    eprintln!("  fedledger request-key <round>                    Queue a key request");
    eprintln!("  fedledger drain-requests                         Take all queued key requests");
    eprintln!("  fedledger issue-key <round> <collection>         Issue a round key");
    eprintln!("  fedledger fetch-key <round> <collection>         Fetch a round key");
    eprintln!("  fedledger state                                  Show the caller's state");
    eprintln!("  fedledger history <name>                         Show a participant's state history");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  FEDLEDGER_DATA_DIR            Ledger directory (default: ./fedledger-data)");
    eprintln!("  FEDLEDGER_IDENTITY            Caller identity, base64 X.509 subject");
    eprintln!("  FEDLEDGER_TRANSIENT_PASSWORD  Key password for issue-key");
    eprintln!("  FEDLEDGER_TRANSIENT_IV        Key IV for issue-key");
    eprintln!("  FEDLEDGER_AGGREGATOR          Aggregator common name (default: appserver)");
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a {} argument", args[1], what))
}

fn parse<T: FromStr>(args: &[String], index: usize, what: &str) -> Result<T, String> {
    let raw = arg(args, index, what)?;
    raw.parse()
        .map_err(|_| format!("invalid {}: {:?}", what, raw))
}

fn payload(args: &[String], index: usize) -> Result<ModelPayload, String> {
    ModelPayload::from_json(arg(args, index, "payload_json")?).map_err(|e| e.to_string())
}

fn transient_from_env() -> Transient {
    let mut transient = Transient::new();
    for (field, var) in [
        (TRANSIENT_PASSWORD, "FEDLEDGER_TRANSIENT_PASSWORD"),
        (TRANSIENT_IV, "FEDLEDGER_TRANSIENT_IV"),
    ] {
        if let Ok(value) = std::env::var(var) {
            transient.insert(field.to_string(), value.into_bytes());
        }
    }
    transient
}

fn parse_invocation(args: &[String]) -> Result<Invocation, String> {
    let invocation = match args[1].as_str() {
        "register" => Invocation::Register,
        "submit" => Invocation::SubmitUpdate {
            payload: payload(args, 2)?,
            privacy_budget: parse(args, 3, "privacy_budget")?,
        },
        "latest" => Invocation::LatestUpdate,
        "select" => Invocation::SelectParticipants {
            count: parse(args, 2, "count")?,
            seed: parse(args, 3, "seed")?,
        },
        "publish" => {
            let sampling = if args.len() > 4 {
                Some(Sampling {
                    count: parse(args, 4, "count")?,
                    seed: parse(args, 5, "seed")?,
                })
            } else {
                None
            };
            Invocation::PublishAggregate {
                payload: payload(args, 2)?,
                round: parse(args, 3, "round")?,
                sampling,
            }
        }
        "fetch-result" => Invocation::FetchResult {
            round: parse(args, 2, "round")?,
        },
        "request-key" => Invocation::RequestKey {
            round: parse(args, 2, "round")?,
        },
        "drain-requests" => Invocation::DrainKeyRequests,
        "issue-key" => Invocation::IssueKey {
            round: parse(args, 2, "round")?,
            collection: arg(args, 3, "collection")?.to_string(),
        },
        "fetch-key" => Invocation::FetchKey {
            round: parse(args, 2, "round")?,
            collection: arg(args, 3, "collection")?.to_string(),
        },
        "state" => Invocation::CurrentState,
        "history" => Invocation::StateHistory {
            name: arg(args, 2, "name")?.to_string(),
        },
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(invocation)
}

fn run(invocation: Invocation) -> Result<String, Error> {
    let cli = CliConfig::from_env();
    let config = ExchangeConfig::from_env()?;
    let identity = cli
        .identity
        .ok_or_else(|| Error::MalformedInput("FEDLEDGER_IDENTITY is not set".into()))?;

    std::fs::create_dir_all(&cli.data_dir)
        .map_err(|e| Error::Ledger(fedledger_ledger::Error::Io(e)))?;
    let ledger = RocksLedger::open(&cli.data_dir)?;
    let contract = RoundContract::new(ledger, config)?;

    let response = contract.execute(&identity, invocation, transient_from_env())?;
    Ok(serde_json::to_string_pretty(&response)?)
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fedledger=info,fedledger_rounds=info,fedledger_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }
    if matches!(args[1].as_str(), "-h" | "--help" | "help") {
        print_usage();
        std::process::exit(0);
    }

    let invocation = match parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    match run(invocation) {
        Ok(output) => println!("{}", output),
        Err(e) if e.is_conflict() => {
            eprintln!("Error: {} (retry the invocation)", e);
            std::process::exit(EXIT_CONFLICT);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
