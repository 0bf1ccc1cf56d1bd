use crate::chart::ChartOptions;
use crate::client::ClientProvider;
use crate::config::TransportKind;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;

pub mod pagination;
pub mod registry;
pub mod schema;
pub mod server;
pub mod tool;
pub mod tools;

pub use registry::{Registry, RegistryError};
pub use server::{RequestContext, Server};

/// Command line options for the MCP server
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config: Option<PathBuf>,
    pub verbose: u8,
    pub loopback: bool,
    pub transport: Option<TransportKind>,
}

impl TryFrom<ArgMatches> for Options {
    type Error = String;

    fn try_from(args: ArgMatches) -> Result<Self, String> {
        let transport = match args.get_one::<String>("TRANSPORT") {
            Some(name) => Some(name.parse::<TransportKind>()?),
            None => None,
        };
        Ok(Options {
            config: args.get_one::<String>("CONFIG").map(PathBuf::from),
            verbose: *args.get_one::<u8>("VERBOSE").unwrap_or(&0),
            loopback: args.get_flag("LOOPBACK"),
            transport,
        })
    }
}

/// Create the MCP server command
pub fn command() -> Command {
    Command::new(crate::common::COMPONENT)
        .version(crate::common::VERSION)
        .about("Serve observability tools to LLM agents over the Model Context Protocol")
        .arg(
            Arg::new("CONFIG")
                .help("Server configuration file")
                .action(ArgAction::Set)
                .index(1),
        )
        .arg(
            Arg::new("VERBOSE")
                .long("verbose")
                .short('v')
                .help("Increase verbosity")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("LOOPBACK")
                .long("loopback")
                .help("Answer Prometheus tools from synthetic in-process data")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("TRANSPORT")
                .long("transport")
                .help("stdio or http, overriding the config file")
                .value_parser(["stdio", "http"])
                .action(ArgAction::Set),
        )
}

/// A registry holding every family `clients` can back.
pub fn build_registry(clients: Arc<ClientProvider>, chart: ChartOptions) -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    for family in tools::families(clients, chart) {
        registry.register_family(family)?;
    }
    Ok(registry)
}
