//! nodessh CLI
//!
//! Runs commands on cluster nodes over SSH, optionally through a bastion

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use eyre::{OptionExt, WrapErr};
use nodessh_exec::{
    ExecError, ExecFailure, ExecutionResult, Executor, HostError, log_result,
    schedulable_ssh_hosts,
};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod inventory;

use config::Config;
use inventory::FileInventory;

#[derive(Parser)]
#[command(name = "nodessh")]
#[command(about = "Run commands on cluster nodes over SSH", long_about = None)]
struct Cli {
    /// Config file (defaults to NODESSH_CONFIG or nodessh.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command on a host:port
    #[command(name = "exec")]
    Exec {
        /// Target host:port
        #[arg(long)]
        host: String,
        /// Provider whose key to use
        #[arg(long)]
        provider: Option<String>,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Run a command on a node by its SSH-able name
    #[command(name = "node-exec")]
    NodeExec {
        /// Node name, reached on port 22
        #[arg(long)]
        node: String,
        /// Provider whose key to use
        #[arg(long)]
        provider: Option<String>,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// List SSH hosts of schedulable nodes
    #[command(name = "hosts")]
    Hosts {
        /// Node inventory file
        #[arg(long)]
        inventory: Option<PathBuf>,
    },
    /// Run a command on an inventory node and require it to succeed
    #[command(name = "issue")]
    Issue {
        /// Node inventory file
        #[arg(long)]
        inventory: Option<PathBuf>,
        /// Node name in the inventory
        #[arg(long)]
        node: String,
        /// Provider whose key to use
        #[arg(long)]
        provider: Option<String>,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = Config::load_default(cli.config.as_deref()).wrap_err("failed to load config")?;
    init_tracing(&config);

    let executor = Executor::new(config.exec_settings());

    match cli.command {
        Commands::Exec {
            host,
            provider,
            command,
        } => {
            let provider = provider_for(provider, &config)?;
            let outcome = executor.execute(&command.join(" "), &host, &provider).await;
            finish_exec(outcome, cli.json)
        }
        Commands::NodeExec {
            node,
            provider,
            command,
        } => {
            let provider = provider_for(provider, &config)?;
            let outcome = executor
                .node_exec(&node, &command.join(" "), &provider)
                .await;
            finish_exec(outcome, cli.json)
        }
        Commands::Hosts { inventory } => {
            let inventory = inventory_for(inventory, &config)?;
            let hosts = match schedulable_ssh_hosts(&inventory).await {
                Ok(hosts) => hosts,
                Err(ExecError::Host(HostError::IncompleteAddresses { hosts, nodes })) => {
                    warn!(found = hosts.len(), nodes, "some nodes have no SSH address");
                    print_hosts(&hosts, cli.json)?;
                    eyre::bail!("only found {} IPs on {nodes} nodes", hosts.len());
                }
                Err(e) => return Err(e.into()),
            };
            print_hosts(&hosts, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Issue {
            inventory,
            node,
            provider,
            command,
        } => {
            let provider = provider_for(provider, &config)?;
            let node = inventory_for(inventory, &config)?.find(&node).await?;
            let result = executor
                .issue_command_with_result(&command.join(" "), &provider, &node)
                .await?;
            print_result(&result, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn provider_for(flag: Option<String>, config: &Config) -> Result<String> {
    flag.or_else(|| config.ssh.provider.clone())
        .ok_or_eyre("no provider given; pass --provider or set ssh.provider")
}

fn inventory_for(flag: Option<PathBuf>, config: &Config) -> Result<FileInventory> {
    flag.or_else(|| config.inventory.clone())
        .map(FileInventory::new)
        .ok_or_eyre("no inventory given; pass --inventory or set inventory")
}

/// Log the result, print it and mirror the remote exit code
fn finish_exec(outcome: Result<ExecutionResult, ExecFailure>, json: bool) -> Result<ExitCode> {
    match outcome {
        Ok(result) => {
            log_result(&result);
            print_result(&result, json)?;
            Ok(ExitCode::from(exit_status(result.code)))
        }
        Err(failure) => {
            log_result(&failure.result);
            error!(error = %failure.error, "execution failed");
            Err(failure.into())
        }
    }
}

/// Process exit status for a remote exit code
fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(u8::MAX)
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    std::io::stdout().write_all(&result.stdout)?;
    std::io::stderr().write_all(&result.stderr)?;
    Ok(())
}

fn print_hosts(hosts: &[String], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hosts)?);
    } else {
        for host in hosts {
            println!("{host}");
        }
    }
    Ok(())
}
