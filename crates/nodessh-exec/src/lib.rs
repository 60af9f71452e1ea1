//! nodessh-exec: SSH command execution against cluster nodes
//!
//! Runs single commands on nodes, either directly or tunneled through a
//! bastion host, and reports stdout, stderr and exit code.

pub mod config;
pub mod error;
pub mod executor;
pub mod hosts;
pub mod keys;
pub mod report;
pub mod result;
pub mod ssh;
pub mod traits;
pub mod tunnel;

pub use config::{
    DialPolicy, ExecSettings, MAX_RETRY_WINDOW, MIN_RETRY_INTERVAL, ProviderKeys, SSH_PORT,
};
pub use error::{ExecError, ExecFailure};
pub use executor::{ExecutionRequest, Executor};
pub use hosts::{
    AddressKind, HostError, Node, NodeAddress, node_ssh_host, resolve_ssh_hosts,
    schedulable_ssh_hosts,
};
pub use keys::{Credential, KeyError, Provider, resolve_signer};
pub use report::log_result;
pub use result::{ExecutionResult, ExitOutcome, RawOutput};
pub use ssh::RusshTransport;
pub use traits::{NodeInventory, SshTransport};
