// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tessera FATE admin CLI
//!
//! Operates directly on the executor's SQLite store; the manager does not
//! need to be running for read-only inspection, and cancel/delete go
//! through the same reservation protocol the manager uses.
//!
//! Usage:
//!   tessera-ctl <command> [options]
//!
//! Commands:
//!   list [--kind <split|compaction-commit>]
//!   status <fate_id>
//!   wait <fate_id> [--timeout-secs <n>]
//!   cancel <fate_id>
//!   delete <fate_id>
//!   return <fate_id>
//!   exception <fate_id>

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tessera_fate::{
    FateAdmin, FateId, FateInstanceType, FateKeyKind, FateStore, SqliteFateStore, StepRegistry,
};

fn print_usage() {
    eprintln!(
        r#"Usage: tessera-ctl <command> [options]

Inspect and manage fault-tolerant executor transactions.

COMMANDS:
    list                            List transactions
    status <fate_id>                Show a transaction's status
    wait <fate_id>                  Wait for a transaction to finish
    cancel <fate_id>                Cancel a transaction that has not started
    delete <fate_id>                Delete a finished transaction record
    return <fate_id>                Print a successful transaction's return value
    exception <fate_id>             Print a failed transaction's recorded failure

LIST OPTIONS:
    --kind <kind>                   Filter by key kind: split | compaction-commit

WAIT OPTIONS:
    --timeout-secs <n>              Give up after n seconds (default: wait forever)

ENVIRONMENT:
    TESSERA_FATE_DB                 Path to the executor's SQLite database (required)
    TESSERA_FATE_INSTANCE_TYPE      USER or META (default: USER)

EXAMPLES:
    # List all user transactions
    tessera-ctl list

    # Cancel a stuck submission
    tessera-ctl cancel FATE:USER:3b241101-0000-4000-8000-000000000000

    # Wait for a table creation to finish, up to a minute
    tessera-ctl wait FATE:USER:3b241101-0000-4000-8000-000000000000 --timeout-secs 60
"#
    );
}

#[derive(Debug)]
enum Command {
    List { kind: Option<FateKeyKind> },
    Status { id: FateId },
    Wait { id: FateId, timeout: Option<Duration> },
    Cancel { id: FateId },
    Delete { id: FateId },
    Return { id: FateId },
    Exception { id: FateId },
}

fn parse_id(arg: Option<&String>) -> Result<FateId, String> {
    let raw = arg.ok_or("missing <fate_id> argument")?;
    raw.parse().map_err(|_| format!("invalid fate id '{raw}'"))
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let command = args.first().ok_or("missing command")?;
    match command.as_str() {
        "list" => {
            let mut kind = None;
            let mut rest = args[1..].iter();
            while let Some(flag) = rest.next() {
                match flag.as_str() {
                    "--kind" => {
                        let value = rest.next().ok_or("--kind requires a value")?;
                        kind = Some(match value.as_str() {
                            "split" => FateKeyKind::Split,
                            "compaction-commit" => FateKeyKind::CompactionCommit,
                            other => return Err(format!("unknown key kind '{other}'")),
                        });
                    }
                    other => return Err(format!("unknown option '{other}'")),
                }
            }
            Ok(Command::List { kind })
        }
        "status" => Ok(Command::Status {
            id: parse_id(args.get(1))?,
        }),
        "wait" => {
            let id = parse_id(args.get(1))?;
            let mut timeout = None;
            let mut rest = args[2..].iter();
            while let Some(flag) = rest.next() {
                match flag.as_str() {
                    "--timeout-secs" => {
                        let value = rest.next().ok_or("--timeout-secs requires a value")?;
                        let secs: u64 = value
                            .parse()
                            .map_err(|_| "--timeout-secs must be a number".to_string())?;
                        timeout = Some(Duration::from_secs(secs));
                    }
                    other => return Err(format!("unknown option '{other}'")),
                }
            }
            Ok(Command::Wait { id, timeout })
        }
        "cancel" => Ok(Command::Cancel {
            id: parse_id(args.get(1))?,
        }),
        "delete" => Ok(Command::Delete {
            id: parse_id(args.get(1))?,
        }),
        "return" => Ok(Command::Return {
            id: parse_id(args.get(1))?,
        }),
        "exception" => Ok(Command::Exception {
            id: parse_id(args.get(1))?,
        }),
        other => Err(format!("unknown command '{other}'")),
    }
}

async fn open_admin() -> anyhow::Result<FateAdmin<()>> {
    let db_path = std::env::var("TESSERA_FATE_DB")
        .map_err(|_| anyhow::anyhow!("TESSERA_FATE_DB must point at the executor database"))?;

    let instance_type = match std::env::var("TESSERA_FATE_INSTANCE_TYPE") {
        Ok(raw) => FateInstanceType::parse(&raw)
            .ok_or_else(|| anyhow::anyhow!("TESSERA_FATE_INSTANCE_TYPE must be USER or META"))?,
        Err(_) => FateInstanceType::User,
    };

    // Admin operations never rehydrate steps, so no decoders are needed.
    let registry = Arc::new(StepRegistry::new());
    let store: Arc<dyn FateStore<()>> =
        Arc::new(SqliteFateStore::from_path(&db_path, instance_type, registry).await?);
    Ok(FateAdmin::new(store))
}

async fn run(command: Command) -> anyhow::Result<()> {
    let admin = open_admin().await?;

    match command {
        Command::List { kind } => {
            let mut rows = admin.list(kind).await?;
            rows.sort_by_key(|(id, _)| id.uuid);
            for (id, key) in &rows {
                let status = admin.status(*id).await?;
                match key {
                    Some(key) => println!("{id}  {status}  key={}", key.kind),
                    None => println!("{id}  {status}"),
                }
            }
            println!("{} transaction(s)", rows.len());
        }
        Command::Status { id } => {
            println!("{}", admin.status(id).await?);
        }
        Command::Wait { id, timeout } => {
            let status = admin.wait_for_completion(id, timeout).await?;
            println!("{status}");
            if !status.is_terminal() {
                anyhow::bail!("timed out waiting for {id}");
            }
        }
        Command::Cancel { id } => {
            if admin.cancel(id).await? {
                println!("cancelled {id}");
            } else {
                anyhow::bail!("{id} could not be cancelled (already running or finished)");
            }
        }
        Command::Delete { id } => {
            admin.delete(id).await?;
            println!("deleted {id}");
        }
        Command::Return { id } => match admin.get_return(id).await? {
            Some(value) => println!("{value}"),
            None => println!("(no return value recorded)"),
        },
        Command::Exception { id } => match admin.get_exception(id).await? {
            Some(failure) => println!("{failure}"),
            None => println!("(no failure recorded)"),
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("error: {message}\n");
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
