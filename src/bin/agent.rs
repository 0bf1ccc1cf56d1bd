use anyhow::Context;
use chrono_mcp::agent::config::CONFIG_FILE_ENV;
use chrono_mcp::agent::{Agent, AgentConfig, ChatClient};
use chrono_mcp::chart::ChartOptions;
use chrono_mcp::client::{ClientProvider, Upstream};
use chrono_mcp::common::logging;
use clap::{Arg, ArgAction, Command};
use ringlog::*;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

fn command() -> Command {
    Command::new("chrono-mcp-agent")
        .version(chrono_mcp::common::VERSION)
        .about("Answer questions about an observability platform with a ReAct agent")
        .arg(
            Arg::new("CONFIG")
                .short('f')
                .long("config")
                .help("Agent configuration file (YAML), unless CONFIG_FILE is set")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("INPUTS")
                .short('i')
                .long("inputs")
                .help("File with one question per line")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("VERBOSE")
                .long("verbose")
                .short('v')
                .help("Increase verbosity")
                .action(ArgAction::Count),
        )
}

fn clients(config: &AgentConfig) -> anyhow::Result<ClientProvider> {
    if config.loopback {
        let base = if config.api_url.is_empty() {
            "https://loopback.invalid"
        } else {
            config.api_url.as_str()
        };
        return Ok(ClientProvider::loopback(base)?);
    }
    Ok(ClientProvider::live(Upstream {
        api_url: config.api_url.clone(),
        api_token: config.api_token.clone(),
        logscale_url: config.logscale_url.clone(),
        logscale_token: config.logscale_token.clone(),
        timeout: UPSTREAM_TIMEOUT,
    })?)
}

/// `CONFIG_FILE` wins over `-f`.
fn config_path(env: Option<String>, flag: Option<&String>) -> Option<PathBuf> {
    env.filter(|p| !p.is_empty())
        .or_else(|| flag.cloned())
        .map(PathBuf::from)
}

fn main() -> anyhow::Result<()> {
    let args = command().get_matches();
    let verbose = *args.get_one::<u8>("VERBOSE").unwrap_or(&0);
    logging::configure(logging::effective_level(Level::Info, verbose)).map_err(anyhow::Error::msg)?;

    let config_path = config_path(std::env::var(CONFIG_FILE_ENV).ok(), args.get_one::<String>("CONFIG"))
        .context("a config file is required (-f or CONFIG_FILE)")?;
    let inputs_path: PathBuf = args
        .get_one::<String>("INPUTS")
        .map(PathBuf::from)
        .context("an inputs file is required")?;

    let config = AgentConfig::from_file(&config_path)?;
    let inputs = std::fs::read_to_string(&inputs_path)
        .with_context(|| format!("Failed to read inputs file {:?}", inputs_path))?;

    let registry = chrono_mcp::mcp::build_registry(Arc::new(clients(&config)?), ChartOptions::default())?;
    info!("agent has {} tools", registry.len());
    let model = ChatClient::new(&config.openai_base_url, &config.openai_api_key, &config.openai_model)?;
    let agent = Agent::new(
        Arc::new(registry),
        Box::new(model),
        config.max_iterations,
        config.tool_timeout()?,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        for input in inputs.lines().map(str::trim).filter(|l| !l.is_empty()) {
            println!("Question: {input}");
            let mut stdout = std::io::stdout();
            let mut stream = |chunk: &str| {
                let _ = stdout.write_all(chunk.as_bytes());
                let _ = stdout.flush();
            };
            match agent.run(input, &mut stream).await {
                Ok(answer) => println!("\n\nAnswer: {answer}\n"),
                Err(e) => {
                    println!();
                    error!("{input:?}: {e}");
                }
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command() {
        let args = command()
            .try_get_matches_from(["chrono-mcp-agent", "-f", "agent.yaml", "-i", "questions.txt", "-v"])
            .unwrap();
        assert_eq!(args.get_one::<String>("CONFIG").unwrap(), "agent.yaml");
        assert_eq!(args.get_one::<String>("INPUTS").unwrap(), "questions.txt");
        assert_eq!(*args.get_one::<u8>("VERBOSE").unwrap(), 1);
    }

    #[test]
    fn test_config_env_overrides_flag() {
        let flag = "flag.yaml".to_string();
        assert_eq!(config_path(Some("env.yaml".into()), Some(&flag)), Some(PathBuf::from("env.yaml")));
        assert_eq!(config_path(Some(String::new()), Some(&flag)), Some(PathBuf::from("flag.yaml")));
        assert_eq!(config_path(None, None), None);
    }

    #[test]
    fn test_inputs_required() {
        assert!(command().try_get_matches_from(["chrono-mcp-agent", "-f", "agent.yaml"]).is_err());
        assert!(command().try_get_matches_from(["chrono-mcp-agent", "-i", "questions.txt"]).is_ok());
    }
}
