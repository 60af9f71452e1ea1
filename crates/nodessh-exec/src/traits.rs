//! Seams between the executors and their collaborators

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::hosts::Node;
use crate::keys::Credential;
use crate::result::RawOutput;

/// SSH client operations the executors are built from
///
/// A `Connection` is an authenticated SSH connection; a `Tunnel` is a raw
/// stream the bastion opened to a target. Implementations release whatever a
/// failed call had already acquired before returning the error.
#[async_trait]
pub trait SshTransport: Send + Sync {
    /// Authenticated SSH connection
    type Connection: Send + Sync;
    /// Raw forwarded stream
    type Tunnel: Send;

    /// Dial `host` over TCP, then handshake and authenticate
    ///
    /// TCP failures are `ExecError::Dial`, SSH failures `ExecError::Handshake`.
    async fn connect(
        &self,
        host: &str,
        user: &str,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Self::Connection, ExecError>;

    /// Ask `via` to open a TCP stream to `target`
    async fn open_tunnel(
        &self,
        via: &Self::Connection,
        target: &str,
    ) -> Result<Self::Tunnel, ExecError>;

    /// Handshake and authenticate over an already open tunnel
    ///
    /// The returned connection owns the tunnel; on failure it is dropped.
    async fn connect_tunnel(
        &self,
        tunnel: Self::Tunnel,
        target: &str,
        user: &str,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Self::Connection, ExecError>;

    /// Open a session on `conn`, run `command` and drain its output
    ///
    /// Errors cover failing to open the session or dispatch the command;
    /// everything after that is reported through `RawOutput::outcome`. The
    /// session is closed before returning.
    async fn run(&self, conn: &Self::Connection, command: &str) -> Result<RawOutput, ExecError>;

    /// Close a connection, including anything it owns
    async fn close(&self, conn: Self::Connection);
}

/// Source of cluster nodes
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// Every node known to the inventory
    async fn list_nodes(&self) -> Result<Vec<Node>, ExecError>;

    /// Nodes that accept workloads
    async fn list_schedulable_nodes(&self) -> Result<Vec<Node>, ExecError> {
        let nodes = self.list_nodes().await?;
        Ok(nodes.into_iter().filter(|n| n.schedulable).collect())
    }
}
