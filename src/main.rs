//! connhub - named service connections
//!
//! Manages named connections in a TOML config file and sends JSON requests
//! to the current one.
//!
//! ## Selecting a connection
//!
//! `--connection <name>` (or `$CONNHUB_CONNECTION`) wins for a single
//! command. Otherwise the configured `defaultConnection` is used, then the
//! first connection by name, then a placeholder pointing at
//! `http://127.0.0.1:80`.
//!
//! ## Interactive mode
//!
//! `connhub shell` reads one command per line. The connection flag only
//! applies to the line it appears on; selection is re-derived after every
//! command.

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser as ClapParser, Subcommand};
use connhub::{
    config::{self, ConfigError},
    display, http, Body, Connection, ConnectionError, ConnectionResolver, ConfigStore,
    RequestClient, RequestError, Verbosity,
};
use reqwest::Method;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// connhub - named service connections
///
/// Keep a set of named service endpoints (URL, token, headers) and send
/// requests to whichever one is current.
#[derive(ClapParser, Debug)]
#[command(name = "connhub", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file
    #[arg(long, env = "CONNHUB_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Use this connection for this command only
    #[arg(short = 'c', long, env = "CONNHUB_CONNECTION", global = true)]
    connection: Option<String>,

    /// Log each request's method, URL, status and timing
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Dump full requests and responses
    #[arg(long, global = true)]
    debug: bool,
}

impl Cli {
    fn verbosity(&self) -> Verbosity {
        if self.debug {
            Verbosity::Debug
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// List connections, marking the current one
    List,

    /// Show connection details
    Describe {
        /// Connection to describe (all when omitted)
        name: Option<String>,

        /// Print auth tokens in full
        #[arg(long)]
        show_token: bool,
    },

    /// Print the current connection
    Current,

    /// Make a connection current and save it as the default
    Use {
        name: String,
    },

    /// Add or replace a connection
    Add {
        name: String,

        /// Base URL requests are sent to
        #[arg(long)]
        url: String,

        /// Auth token, sent as a bearer token
        #[arg(long, default_value = "")]
        token: String,

        /// Extra header as NAME=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },

    /// Remove a connection
    Remove {
        name: String,
    },

    /// GET a path on the current connection
    Get(RequestArgs),

    /// POST to a path on the current connection
    Post(RequestArgs),

    /// PUT to a path on the current connection
    Put(RequestArgs),

    /// PATCH a path on the current connection
    Patch(RequestArgs),

    /// DELETE a path on the current connection
    Delete(RequestArgs),

    /// Read commands from stdin, one per line
    Shell,
}

impl Commands {
    /// Whether the command reads or changes the current connection.
    /// Managing entries doesn't, so it skips resolution and its fallback.
    fn uses_current_connection(&self) -> bool {
        !matches!(self, Commands::Add { .. } | Commands::Remove { .. })
    }
}

#[derive(Args, Debug, Clone)]
struct RequestArgs {
    /// Path appended to the connection's service URL
    path: String,

    /// JSON request body, sent as-is
    #[arg(long)]
    data: Option<String>,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name missing in '{}'", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbosity());

    if let Err(e) = run(cli).await {
        eprintln!("connhub: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbosity: Verbosity) {
    let default_filter = match verbosity {
        Verbosity::Quiet => "connhub=warn",
        Verbosity::Verbose => "connhub=info",
        Verbosity::Debug => "connhub=debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = config::resolve_config_path(cli.config.as_deref());
    let store = ConfigStore::new();
    if let Some(path) = &config_path {
        config::load(&store, path)?;
    }

    let app = App {
        config_path,
        resolver: ConnectionResolver::new(store),
    };

    match cli.command {
        Commands::Shell => app.shell().await,
        ref command => {
            let result = app
                .execute(command, cli.connection.as_deref(), cli.verbosity())
                .await;
            app.resolver.reset_connection();
            result
        }
    }
}

struct App {
    config_path: Option<PathBuf>,
    resolver: ConnectionResolver,
}

impl App {
    async fn execute(
        &self,
        command: &Commands,
        connection_flag: Option<&str>,
        verbosity: Verbosity,
    ) -> Result<(), CliError> {
        self.resolver
            .set_flag_override(connection_flag.unwrap_or_default());
        if command.uses_current_connection() {
            self.resolver.init_connections();
        }
        let registry = self.resolver.registry();

        match command {
            Commands::List => {
                let current = self.resolver.current_name();
                print!("{}", display::render_list(&registry.list(), current.as_deref()));
            }
            Commands::Describe { name, show_token } => {
                let current = self.resolver.current_name();
                let connections = match name {
                    Some(name) => vec![registry
                        .get(name)
                        .ok_or_else(|| ConnectionError::NamedConnectionNotFound(name.clone()))?],
                    None => registry.list().into_vec(),
                };
                print!(
                    "{}",
                    display::render_describe(&connections, current.as_deref(), *show_token)
                );
            }
            Commands::Current => {
                let conn = self.resolver.resolve_current()?;
                println!("{}\t{}", conn.name, conn.service_url);
            }
            Commands::Use { name } => {
                self.resolver.reset_connection();
                if !self.resolver.set_connection(name) {
                    return Err(ConnectionError::NamedConnectionNotFound(name.clone()).into());
                }
                self.save()?;
                println!("Using connection '{}'.", name);
            }
            Commands::Add {
                name,
                url,
                token,
                headers,
            } => {
                let mut conn =
                    Connection::new(name.as_str(), url.as_str()).with_token(token.as_str());
                for (header, value) in headers {
                    conn = conn.with_header(header.as_str(), value.as_str());
                }
                registry.put(&conn)?;
                self.save()?;
                println!("Connection '{}' saved.", name);
            }
            Commands::Remove { name } => {
                if !registry.remove(name) {
                    return Err(ConnectionError::NamedConnectionNotFound(name.clone()).into());
                }
                self.save()?;
                println!("Connection '{}' removed.", name);
            }
            Commands::Get(args) => self.request(Method::GET, args, verbosity).await?,
            Commands::Post(args) => self.request(Method::POST, args, verbosity).await?,
            Commands::Put(args) => self.request(Method::PUT, args, verbosity).await?,
            Commands::Patch(args) => self.request(Method::PATCH, args, verbosity).await?,
            Commands::Delete(args) => self.request(Method::DELETE, args, verbosity).await?,
            Commands::Shell => {
                eprintln!("connhub: already in a shell");
            }
        }
        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        args: &RequestArgs,
        verbosity: Verbosity,
    ) -> Result<(), CliError> {
        let conn = self.resolver.resolve_current()?;
        if conn.is_broken_default() {
            tracing::warn!(
                url = %conn.service_url,
                "no connections configured, sending to placeholder"
            );
        }
        let client = RequestClient::new().with_verbosity(verbosity);
        let body = args.data.clone().map(Body::from);
        let exchange = client.send(&conn, method, &args.path, body).await?;
        match http::pretty_json(&exchange.body) {
            Some(pretty) => println!("{}", pretty),
            None if !exchange.body.is_empty() => println!("{}", exchange.text()),
            None => {}
        }
        Ok(())
    }

    fn save(&self) -> Result<(), CliError> {
        let path = self.config_path.as_deref().ok_or(ConfigError::NoLocation)?;
        config::save(self.resolver.store(), path)?;
        Ok(())
    }

    /// Interactive loop: one command per line until EOF or `exit`.
    async fn shell(&self) -> Result<(), CliError> {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            prompt()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let cli = match parse_shell_line(&line) {
                Ok(ShellLine::Blank) => continue,
                Ok(ShellLine::Exit) => break,
                Ok(ShellLine::Command(cli)) => cli,
                Err(e) => {
                    let _ = e.print();
                    continue;
                }
            };
            if let Some(path) = &cli.config {
                if Some(path.as_path()) != self.config_path.as_deref() {
                    eprintln!("connhub: --config is ignored inside the shell");
                }
            }

            let result = self
                .execute(&cli.command, cli.connection.as_deref(), cli.verbosity())
                .await;
            if let Err(e) = result {
                eprintln!("connhub: {}", e);
            }
            // The flag only applies to the line it was given on.
            self.resolver.reset_connection();
        }
        Ok(())
    }
}

enum ShellLine {
    Blank,
    Exit,
    Command(Box<Cli>),
}

/// Parse one shell line. Words are split the way a POSIX shell would, so
/// quoted JSON bodies reach `--data` intact.
fn parse_shell_line(line: &str) -> Result<ShellLine, clap::Error> {
    let line = line.trim();
    match line {
        "" => return Ok(ShellLine::Blank),
        "exit" | "quit" => return Ok(ShellLine::Exit),
        _ => {}
    }
    let words = shlex::split(line).ok_or_else(|| {
        Cli::command().error(
            clap::error::ErrorKind::InvalidValue,
            "unbalanced quotes or trailing escape",
        )
    })?;
    let args = std::iter::once("connhub".to_string()).chain(words);
    Cli::try_parse_from(args).map(|cli| ShellLine::Command(Box::new(cli)))
}

fn prompt() -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "connhub> ")?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_header_splits_on_first_equals() {
        assert_eq!(
            parse_header("X-Query=a=b").unwrap(),
            ("X-Query".to_string(), "a=b".to_string())
        );
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn connection_flag_is_global() {
        let cli = Cli::try_parse_from(["connhub", "list", "-c", "prod"]).unwrap();
        assert_eq!(cli.connection.as_deref(), Some("prod"));
    }

    #[test]
    fn debug_wins_over_verbose() {
        let cli = Cli::try_parse_from(["connhub", "-v", "--debug", "current"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Debug);
    }

    #[test]
    fn add_collects_headers() {
        let cli = Cli::try_parse_from([
            "connhub", "add", "prod", "--url", "https://api", "--header", "A=1", "--header", "B=2",
        ])
        .unwrap();
        match cli.command {
            Commands::Add { headers, token, .. } => {
                assert_eq!(headers.len(), 2);
                assert!(token.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    fn shell_command(line: &str) -> Cli {
        match parse_shell_line(line).unwrap() {
            ShellLine::Command(cli) => *cli,
            _ => panic!("expected a command for {:?}", line),
        }
    }

    #[test]
    fn shell_line_keeps_quoted_json_body() {
        let cli = shell_command(r#"post /x --data '{"a": 1}'"#);
        match cli.command {
            Commands::Post(args) => {
                assert_eq!(args.path, "/x");
                assert_eq!(args.data.as_deref(), Some(r#"{"a": 1}"#));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn shell_line_accepts_double_quoted_header() {
        let cli = shell_command(r#"add prod --url http://p --header "X-Note=two words""#);
        match cli.command {
            Commands::Add { headers, .. } => {
                assert_eq!(headers, vec![("X-Note".to_string(), "two words".to_string())]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn shell_line_rejects_unbalanced_quotes() {
        assert!(parse_shell_line(r#"post /x --data '{"a": 1}"#).is_err());
    }

    #[test]
    fn shell_line_recognizes_blank_and_exit() {
        assert!(matches!(parse_shell_line("   "), Ok(ShellLine::Blank)));
        assert!(matches!(parse_shell_line(" quit "), Ok(ShellLine::Exit)));
    }

    #[test]
    fn entry_management_skips_resolution() {
        let add = shell_command("add a --url http://a").command;
        let remove = shell_command("remove a").command;
        let list = shell_command("list").command;
        assert!(!add.uses_current_connection());
        assert!(!remove.uses_current_connection());
        assert!(list.uses_current_connection());
    }
}
