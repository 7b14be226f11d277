//! Command-line argument parsing for db-tally.

use clap::{Args, Parser, Subcommand};
use db_tally::error::{Result, TallyError};
use db_tally::template::{Param, Params};
use std::path::PathBuf;

/// Run parameterized analytical queries against a row store or batch store.
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, value_name = "PATH", global = true, env = "DB_TALLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use mock backends (in-memory, for trying templates out)
    #[arg(long, global = true)]
    pub mock: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List configured templates
    List,

    /// Print a template's bound SQL without running it
    Show {
        /// Template name
        template: String,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Bind and run a template
    Run {
        /// Template name
        template: String,

        #[command(flatten)]
        params: ParamArgs,

        /// Run once per calendar month in FROM..TO (ISO dates), binding
        /// start_date and end_date
        #[arg(long, value_name = "FROM..TO")]
        monthly: Option<String>,

        /// Output format: text or json
        #[arg(long, value_name = "FORMAT", default_value = "text")]
        format: String,

        /// Overall deadline for the run, in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Skip the backend's configured session directives
        #[arg(long)]
        no_pre_statements: bool,
    },

    /// Intersection size from two set counts and their union
    Overlap {
        /// Size of the first set
        a: u64,
        /// Size of the second set
        b: u64,
        /// Size of their union
        union: u64,
    },
}

/// Template parameters.
#[derive(Args, Debug, Default)]
pub struct ParamArgs {
    /// Parameter value, typed automatically (integer, decimal, ISO date, or text)
    #[arg(short = 'P', long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Parameter value emitted verbatim, for trusted identifiers
    #[arg(short = 'R', long = "raw", value_name = "NAME=VALUE")]
    pub raw: Vec<String>,
}

impl ParamArgs {
    /// Collects the parameters into a typed map.
    pub fn to_params(&self) -> Result<Params> {
        let mut params = Params::new();
        for assignment in &self.params {
            let (name, value) = split_assignment(assignment)?;
            params.insert(name, Param::infer(&value));
        }
        for assignment in &self.raw {
            let (name, value) = split_assignment(assignment)?;
            params.insert(name, Param::Raw(value));
        }
        Ok(params)
    }
}

fn split_assignment(s: &str) -> Result<(String, String)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| TallyError::config(format!("expected NAME=VALUE, got '{s}'")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(TallyError::config(format!("parameter name missing in '{s}'")));
    }
    Ok((name.to_string(), value.to_string()))
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(db_tally::config::Config::default_path)
    }
}
