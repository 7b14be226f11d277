//! tally - run parameterized analytical queries.

mod cli;
mod logging;
mod output;

use std::time::Duration;

use cli::{Cli, Command, ParamArgs};
use db_tally::aggregate::pairwise_overlap;
use db_tally::config::Config;
use db_tally::db::{Backends, MockBackend};
use db_tally::error::{Result, TallyError};
use db_tally::periods::{monthly_windows, parse_range};
use db_tally::runner::{QueryTemplateRunner, RunOptions};
use output::OutputFormat;
use tracing::{error, info};

fn main() {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    logging::init_stderr_logging(cli.verbose);

    // Queries are issued one at a time, so a single-threaded runtime suffices.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Overlap { a, b, union } = &cli.command {
        println!("{}", pairwise_overlap(*a, *b, *union)?);
        return Ok(());
    }

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;
    let runner = config.build_runner()?;

    match &cli.command {
        Command::List => list(&runner),
        Command::Show { template, params } => {
            let query = runner.bind(template, &params.to_params()?)?;
            println!("-- {} ({})", query.template(), query.backend());
            println!("{}", query.sql_text().trim());
            Ok(())
        }
        Command::Run {
            template,
            params,
            monthly,
            format,
            timeout,
            no_pre_statements,
        } => {
            let format: OutputFormat = format.parse().map_err(TallyError::config)?;
            let kind = runner.template(template)?.backend();
            let backends = if cli.mock {
                Backends::new().with(Box::new(MockBackend::new(kind)))
            } else {
                config.connect_backend(kind).await?
            };

            let request = RunRequest {
                template,
                params,
                monthly: monthly.as_deref(),
                format,
                timeout: timeout.map(Duration::from_secs),
                use_pre_statements: !no_pre_statements,
            };
            let outcome = execute(&runner, &config, &backends, request).await;
            backends.close().await?;
            println!("{}", outcome?);
            Ok(())
        }
        Command::Overlap { .. } => Ok(()),
    }
}

fn list(runner: &QueryTemplateRunner) -> Result<()> {
    for template in runner.templates() {
        let parameters: Vec<&str> = template
            .required_parameters()
            .iter()
            .map(String::as_str)
            .collect();
        println!(
            "{}  [{}]  ({})",
            template.name(),
            template.backend(),
            parameters.join(", ")
        );
        if let Some(description) = template.description() {
            println!("    {description}");
        }
    }
    Ok(())
}

struct RunRequest<'a> {
    template: &'a str,
    params: &'a ParamArgs,
    monthly: Option<&'a str>,
    format: OutputFormat,
    timeout: Option<Duration>,
    use_pre_statements: bool,
}

async fn execute(
    runner: &QueryTemplateRunner,
    config: &Config,
    backends: &Backends,
    request: RunRequest<'_>,
) -> Result<String> {
    let params = request.params.to_params()?;
    let kind = runner.template(request.template)?.backend();
    let options = RunOptions {
        timeout: request.timeout,
    };
    let pre_statements = if request.use_pre_statements {
        config.pre_statements(kind)
    } else {
        &[]
    };

    match request.monthly {
        Some(range) => {
            let (from, to) = parse_range(range)?;
            let windows = monthly_windows(from, to)?;
            let results = runner
                .run_series(
                    request.template,
                    &params,
                    &windows,
                    backends,
                    pre_statements,
                    options,
                )
                .await?;
            output::render_series(&results, request.format)
        }
        None => {
            let query = runner.bind(request.template, &params)?;
            let result = runner
                .run_with(&query, backends, pre_statements, options)
                .await?;
            output::render(&result, request.format)
        }
    }
}
