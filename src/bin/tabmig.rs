// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use tabmig::{
    config::{MigrateConfig, ServerLogin},
    document::TomlDocumentParser,
    migrate::{ConnectionOverride, DatasourceMigration, WorkbookMigration},
    path::default_config_path,
    server::{connect, ServerClient},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{InquireError, Password, Text};
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "tabmig [options] <tabmig-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Logging verbosity, ignored when RUST_LOG is set.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Error)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        match self.command {
            Command::Datasource(opts) => run_datasource(&config, opts),
            Command::Workbook(opts) => run_workbook(&config, opts),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Point datasources at a new database and publish them.
    #[command(override_usage = "tabmig datasource [options] <datasource>...")]
    Datasource(DatasourceOptions),

    /// Remap datasource references of workbooks and publish them elsewhere.
    #[command(override_usage = "tabmig workbook [options] <workbook>...")]
    Workbook(WorkbookOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DatasourceOptions {
    /// Datasource files to migrate, glob patterns allowed.
    #[arg(required = true, value_name = "datasource")]
    pub datasources: Vec<String>,

    /// Database host datasources connect to.
    #[arg(long, value_name = "host")]
    pub host: String,

    /// Database port datasources connect to.
    #[arg(long, value_name = "port")]
    pub port: String,

    /// Database name datasources connect to.
    #[arg(long, value_name = "database")]
    pub database: String,

    /// Database login embedded into datasources.
    #[arg(long, value_name = "login")]
    pub login: String,

    /// Database password embedded into datasources.
    #[arg(short = 'P', long = "db-password", value_name = "password")]
    pub db_password: String,

    /// Server to publish to, by profile name or address.
    #[arg(long, value_name = "server")]
    pub server: String,

    /// Site of server to publish to.
    #[arg(long, value_name = "site")]
    pub site: Option<String>,

    /// Project to publish into.
    #[arg(long, value_name = "project")]
    pub project: String,

    /// User to sign in as.
    #[arg(long, value_name = "username")]
    pub username: Option<String>,

    /// Password of user to sign in as.
    #[arg(long, value_name = "password")]
    pub password: Option<String>,

    /// Directory rewritten datasources are saved into.
    #[arg(long, value_name = "dir")]
    pub directory: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct WorkbookOptions {
    /// Workbook files to migrate, glob patterns allowed.
    #[arg(required = true, value_name = "workbook")]
    pub workbooks: Vec<String>,

    /// Source server, by profile name or address.
    #[arg(short, long, value_name = "server")]
    pub server: String,

    /// User to sign in to source server as.
    #[arg(short, long, value_name = "username")]
    pub username: Option<String>,

    /// Password of source server user.
    #[arg(short, long, value_name = "password")]
    pub password: Option<String>,

    /// Destination server, by profile name or address.
    #[arg(short = 'D', long, value_name = "server")]
    pub dest: String,

    /// User to sign in to destination server as.
    #[arg(short = 'U', long, value_name = "username")]
    pub dest_username: Option<String>,

    /// Password of destination server user.
    #[arg(short = 'P', long, value_name = "password")]
    pub dest_password: Option<String>,

    /// Project on source server workbooks come from.
    #[arg(short = 'S', long, value_name = "project")]
    pub source: String,

    /// Project on destination server workbooks are published into.
    #[arg(short = 'T', long, value_name = "project")]
    pub target: String,

    /// Directory rewritten workbooks are saved into.
    #[arg(short, long, value_name = "dir")]
    pub directory: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.directive()));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn load_config(path: Option<&Path>) -> Result<MigrateConfig> {
    // INVARIANT: Only an explicitly requested configuration file must exist.
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Ok(path) => (path, false),
            Err(err) => {
                debug!("{err}, use default configuration");
                return Ok(MigrateConfig::default());
            }
        },
    };

    match read_to_string(&path) {
        Ok(data) => data
            .parse::<MigrateConfig>()
            .with_context(|| format!("malformed configuration {:?}", path.display())),
        Err(err) if !required && err.kind() == ErrorKind::NotFound => {
            debug!("no configuration at {:?}, use defaults", path.display());
            Ok(MigrateConfig::default())
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to read configuration {:?}", path.display()))
        }
    }
}

fn run_datasource(config: &MigrateConfig, opts: DatasourceOptions) -> Result<()> {
    let login = config.resolve_server(&opts.server, opts.username, opts.password, opts.site);
    let mut client = open_server(login)?;

    let connection = ConnectionOverride {
        host: opts.host,
        port: opts.port,
        database: opts.database,
        login: opts.login,
        password: opts.db_password,
    };
    let directory = opts
        .directory
        .unwrap_or_else(|| config.settings.directory().to_path_buf());
    let migration =
        DatasourceMigration::prepare(client.as_ref(), &opts.project, connection, directory)?;

    let parser = TomlDocumentParser::new();
    let datasources = expand_patterns(opts.datasources);
    let bar = progress_bar(datasources.len())?;
    for path in &datasources {
        bar.set_message(path.display().to_string());
        let published = migration.migrate(client.as_mut(), &parser, path)?;
        bar.suspend(|| {
            println!(
                "data source published ID: {}",
                published.id.as_deref().unwrap_or_default()
            )
        });
        bar.inc(1);
    }
    bar.finish_and_clear();

    client.sign_out()?;

    Ok(())
}

fn run_workbook(config: &MigrateConfig, opts: WorkbookOptions) -> Result<()> {
    let login = config.resolve_server(&opts.server, opts.username, opts.password, None);
    let mut source = open_server(login)?;
    let login = config.resolve_server(&opts.dest, opts.dest_username, opts.dest_password, None);
    let mut dest = open_server(login)?;

    let directory = opts
        .directory
        .unwrap_or_else(|| config.settings.directory().to_path_buf());
    let migration = WorkbookMigration::prepare(
        source.as_ref(),
        dest.as_ref(),
        &opts.source,
        &opts.target,
        directory,
    )?;
    println!(
        "source: {} [{}]",
        source.base_url(),
        migration.source_project().name
    );
    println!(
        "destination: {} [{}]",
        dest.base_url(),
        migration.target_project().name
    );

    let parser = TomlDocumentParser::new();
    let workbooks = expand_patterns(opts.workbooks);
    let bar = progress_bar(workbooks.len())?;
    for path in &workbooks {
        bar.set_message(path.display().to_string());
        let published = migration.migrate(dest.as_mut(), &parser, path)?;
        bar.suspend(|| {
            println!(
                "workbook published ID: {}",
                published.id.as_deref().unwrap_or_default()
            )
        });
        bar.inc(1);
    }
    bar.finish_and_clear();

    source.sign_out()?;
    dest.sign_out()?;

    Ok(())
}

fn open_server(login: ServerLogin) -> Result<Box<dyn ServerClient>> {
    let mut client = connect(&login.address)?;
    let address = login.address.clone();
    let credentials = login.into_credentials(|field| prompt(&address, field))?;
    client.sign_in(&credentials)?;
    client.use_server_version()?;

    Ok(client)
}

fn prompt(address: &str, field: &str) -> Result<String, InquireError> {
    let message = format!("{field} for {address}");
    match field {
        "password" => Password::new(&message).without_confirmation().prompt(),
        _ => Text::new(&message).prompt(),
    }
}

fn expand_patterns(patterns: Vec<String>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matched: Vec<PathBuf> = match glob(&pattern) {
            Ok(entries) => entries.filter_map(|entry| entry.ok()).collect(),
            Err(err) => {
                debug!("{pattern:?} is not a glob pattern: {err}");
                Vec::new()
            }
        };

        // INVARIANT: Keep unmatched pattern so the parser reports the missing file.
        if matched.is_empty() {
            paths.push(PathBuf::from(pattern));
        } else {
            paths.extend(matched);
        }
    }

    paths
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}] {pos}/{len}",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);

    Ok(bar)
}
