//! tinyrel - one-shot driver for LOAD and SELECT over tinyrel tables
//!
//! The driver hands already-parsed operations to the engine: `load` streams
//! a CSV file into `<table>.tbl` (and `<table>.idx` with `--index`),
//! `select` evaluates a conjunction of `attr op literal` predicates.
//! Matching tuples go to stdout, diagnostics to stderr.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use tinyrel_engine::exec::load::load;
use tinyrel_engine::exec::predicate::{Attr, CompOp, Predicate};
use tinyrel_engine::exec::select::{select, Projection};
use tinyrel_engine::EngineError;

#[derive(Parser)]
#[command(name = "tinyrel")]
#[command(version, about = "Minimalist relational storage engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load CSV rows into a table
    Load {
        /// Table name; files are <table>.tbl and <table>.idx
        table: String,
        /// CSV load file with one `key,value` row per line
        file: PathBuf,
        /// Build the key index while loading
        #[arg(long)]
        index: bool,
    },
    /// Select rows from a table
    Select {
        /// Projection: key, value, * or count
        projection: String,
        /// Table name
        table: String,
        /// Predicates such as 'key>3' or "value='abc'"; repeatable
        #[arg(short = 'w', long = "where")]
        predicates: Vec<String>,
    },
}

fn parse_projection(s: &str) -> Result<Projection> {
    match s {
        "key" => Ok(Projection::Key),
        "value" => Ok(Projection::Value),
        "*" => Ok(Projection::All),
        "count" | "count(*)" => Ok(Projection::Count),
        other => bail!("unknown projection {:?} (expected key, value, * or count)", other),
    }
}

/// Parse one `attr op literal` predicate, e.g. `key>3` or `value<>'x'`
fn parse_predicate(s: &str) -> Result<Predicate> {
    let pos = s
        .find(['<', '>', '=', '!'])
        .with_context(|| format!("no comparison operator in predicate {:?}", s))?;

    // two-character operators first so `<=` is not read as `<`
    let rest = &s[pos..];
    let (token, op) = if rest.starts_with("<=") {
        ("<=", CompOp::Le)
    } else if rest.starts_with(">=") {
        (">=", CompOp::Ge)
    } else if rest.starts_with("<>") {
        ("<>", CompOp::Ne)
    } else if rest.starts_with("!=") {
        ("!=", CompOp::Ne)
    } else if rest.starts_with('=') {
        ("=", CompOp::Eq)
    } else if rest.starts_with('<') {
        ("<", CompOp::Lt)
    } else if rest.starts_with('>') {
        (">", CompOp::Gt)
    } else {
        bail!("unknown comparison operator in predicate {:?}", s);
    };

    let attr = match s[..pos].trim() {
        "key" => Attr::Key,
        "value" => Attr::Value,
        other => bail!("unknown attribute {:?} in predicate {:?}", other, s),
    };

    let literal = s[pos + token.len()..].trim();
    let literal = literal
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| literal.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .unwrap_or(literal);
    Ok(Predicate {
        attr,
        op,
        literal: literal.to_string(),
    })
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Load { table, file, index } => {
            let rows = load(&table, &file, index)
                .with_context(|| format!("cannot load table {}", table))?;
            eprintln!("Loaded {} rows into {}", rows, table);
        }
        Command::Select {
            projection,
            table,
            predicates,
        } => {
            let projection = parse_projection(&projection)?;
            let predicates = predicates
                .iter()
                .map(|p| parse_predicate(p))
                .collect::<Result<Vec<_>>>()?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            select(&table, projection, &predicates, &mut out)
                .with_context(|| format!("cannot select from table {}", table))?;
            out.flush()?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let status = err
                .downcast_ref::<EngineError>()
                .map(|e| e.code())
                .unwrap_or(-1);
            error!(status, "operation failed");
            eprintln!("Error: {:#} (status {})", err, status);
            ExitCode::FAILURE
        }
    }
}
