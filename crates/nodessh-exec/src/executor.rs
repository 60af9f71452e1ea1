//! Command execution against cluster nodes

use std::future::Future;
use std::time::Instant;

use tokio::time::timeout;
use tracing::{error, info, instrument};

use crate::config::{ExecSettings, SSH_PORT};
use crate::error::{ExecError, ExecFailure};
use crate::hosts::{Node, join_host_port, node_ssh_host};
use crate::keys::{Credential, resolve_signer};
use crate::report::log_result;
use crate::result::{ExecutionResult, ExitOutcome, RawOutput};
use crate::ssh::RusshTransport;
use crate::traits::SshTransport;
use crate::tunnel::run_via_bastion;

/// One command to run on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Command line passed to the remote shell
    pub command: String,
    /// Target `host:port`
    pub host: String,
    /// Remote user
    pub user: String,
    /// Bastion `host:port` to tunnel through
    pub bastion: Option<String>,
}

impl ExecutionRequest {
    /// Create a direct request
    pub fn new(
        command: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            host: host.into(),
            user: user.into(),
            bastion: None,
        }
    }

    /// Route the request through a bastion
    #[must_use]
    pub fn via_bastion(mut self, bastion: impl Into<String>) -> Self {
        self.bastion = Some(bastion.into());
        self
    }

    fn empty_result(&self) -> ExecutionResult {
        ExecutionResult {
            user: self.user.clone(),
            ..ExecutionResult::new(&self.host, &self.command)
        }
    }
}

/// Runs commands over SSH, directly or through a bastion
#[derive(Debug)]
pub struct Executor<T = RusshTransport> {
    transport: T,
    settings: ExecSettings,
}

impl Executor<RusshTransport> {
    /// Create an executor using russh
    #[must_use]
    pub fn new(settings: ExecSettings) -> Self {
        Self::with_transport(RusshTransport::new(), settings)
    }
}

impl<T: SshTransport> Executor<T> {
    /// Create an executor over a custom transport
    pub fn with_transport(transport: T, settings: ExecSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Transport used for connections
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Settings this executor was built with
    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    /// Run `command` on `host` with the key of `provider`
    ///
    /// Goes through the configured bastion when there is one. A nonzero remote
    /// exit code is not an error.
    ///
    /// # Errors
    /// Returns `ExecFailure` carrying the partial result if the signer cannot
    /// be resolved or the command could not be run to completion
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        command: &str,
        host: &str,
        provider: &str,
    ) -> Result<ExecutionResult, ExecFailure> {
        let credential = match resolve_signer(provider, &self.settings) {
            Ok(credential) => credential,
            Err(e) => {
                error!(provider = %provider, error = %e, "error getting signer");
                return Err(ExecFailure::new(ExecutionResult::new(host, command), e));
            }
        };

        let mut request = ExecutionRequest::new(command, host, self.settings.user.clone());
        if let Some(bastion) = &self.settings.bastion {
            request = request.via_bastion(bastion.clone());
        }

        self.execute_request(&request, &credential).await
    }

    /// Run a fully specified request
    ///
    /// # Errors
    /// Returns `ExecFailure` if the command could not be run to completion
    pub async fn execute_request(
        &self,
        request: &ExecutionRequest,
        credential: &Credential,
    ) -> Result<ExecutionResult, ExecFailure> {
        let start = Instant::now();
        let outcome = match &request.bastion {
            Some(bastion) => {
                self.bounded(run_via_bastion(
                    &self.transport,
                    request,
                    bastion,
                    credential,
                    &self.settings.dial,
                ))
                .await
            }
            None => self.bounded(self.run_direct(request, credential)).await,
        };

        let mut result = request.empty_result();
        result.duration = start.elapsed();
        finish(result, outcome)
    }

    /// Run `command` on `host` over a single direct connection
    ///
    /// # Errors
    /// Returns `ExecFailure` if the command could not be run to completion
    pub async fn execute_direct(
        &self,
        command: &str,
        user: &str,
        host: &str,
        credential: &Credential,
    ) -> Result<ExecutionResult, ExecFailure> {
        self.execute_request(&ExecutionRequest::new(command, host, user), credential)
            .await
    }

    /// Run `command` on `host` through `bastion`
    ///
    /// # Errors
    /// Returns `ExecFailure` if the bastion, the tunnel or the command session
    /// failed
    pub async fn execute_via_bastion(
        &self,
        command: &str,
        user: &str,
        bastion: &str,
        host: &str,
        credential: &Credential,
    ) -> Result<ExecutionResult, ExecFailure> {
        let request = ExecutionRequest::new(command, host, user).via_bastion(bastion);
        self.execute_request(&request, credential).await
    }

    /// Run `command` on the node reachable as `node_name`
    ///
    /// # Errors
    /// See [`Executor::execute`]
    pub async fn node_exec(
        &self,
        node_name: &str,
        command: &str,
        provider: &str,
    ) -> Result<ExecutionResult, ExecFailure> {
        self.execute(command, &join_host_port(node_name, SSH_PORT), provider)
            .await
    }

    /// Run `command` on `node`, log the result and require exit code 0
    ///
    /// # Errors
    /// Returns `ExecError::Host` if the node has no address and
    /// `ExecError::CommandFailed` if the command failed in any way
    #[instrument(skip(self, node), fields(node = %node.name))]
    pub async fn issue_command_with_result(
        &self,
        command: &str,
        provider: &str,
        node: &Node,
    ) -> Result<ExecutionResult, ExecError> {
        info!(node = %node.name, "getting external IP address");
        let host = node_ssh_host(node)?;

        info!("SSH {command:?} on {}({host})", node.name);
        let (result, failure) = match self.execute(command, &host, provider).await {
            Ok(result) => (result, None),
            Err(ExecFailure { result, error }) => (result, Some(error)),
        };
        log_result(&result);

        if result.code != 0 || failure.is_some() {
            return Err(ExecError::CommandFailed {
                command: command.to_string(),
                code: result.code,
                stderr: result.stderr_lossy().into_owned(),
                reason: failure.map_or_else(
                    || "remote command exited nonzero".to_string(),
                    |e| e.to_string(),
                ),
            });
        }

        Ok(result)
    }

    /// [`Executor::issue_command_with_result`] without the result
    ///
    /// # Errors
    /// See [`Executor::issue_command_with_result`]
    pub async fn issue_command(
        &self,
        command: &str,
        provider: &str,
        node: &Node,
    ) -> Result<(), ExecError> {
        self.issue_command_with_result(command, provider, node)
            .await
            .map(|_| ())
    }

    async fn run_direct(
        &self,
        request: &ExecutionRequest,
        credential: &Credential,
    ) -> Result<RawOutput, ExecError> {
        let conn = self
            .transport
            .connect(
                &request.host,
                &request.user,
                credential,
                self.settings.dial.handshake_timeout,
            )
            .await?;

        let outcome = self.transport.run(&conn, &request.command).await;
        self.transport.close(conn).await;
        outcome
    }

    /// Apply the configured deadline, if any
    async fn bounded<F>(&self, fut: F) -> Result<RawOutput, ExecError>
    where
        F: Future<Output = Result<RawOutput, ExecError>>,
    {
        match self.settings.deadline {
            Some(limit) => timeout(limit, fut).await.unwrap_or_else(|_| {
                error!(timeout = ?limit, "execution timed out");
                Err(ExecError::Timeout { timeout: limit })
            }),
            None => fut.await,
        }
    }
}

/// Fold the captured output into the result and classify the outcome
fn finish(
    mut result: ExecutionResult,
    outcome: Result<RawOutput, ExecError>,
) -> Result<ExecutionResult, ExecFailure> {
    let raw = match outcome {
        Ok(raw) => raw,
        Err(e) => return Err(ExecFailure::new(result, e)),
    };

    result.stdout = raw.stdout;
    result.stderr = raw.stderr;

    match raw.outcome {
        ExitOutcome::Completed(code) => {
            result.code = code;
            Ok(result)
        }
        ExitOutcome::TransportError(reason) => {
            let error = ExecError::Transport {
                user: result.user.clone(),
                host: result.host.clone(),
                command: result.command.clone(),
                reason,
            };
            Err(ExecFailure::new(result, error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(outcome: ExitOutcome) -> RawOutput {
        RawOutput {
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
            outcome,
        }
    }

    fn base() -> ExecutionResult {
        ExecutionRequest::new("uptime", "10.0.0.1:22", "core").empty_result()
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let result = finish(base(), Ok(raw(ExitOutcome::Completed(7)))).unwrap();
        assert_eq!(result.code, 7);
        assert_eq!(result.stdout, b"out");
        assert_eq!(result.stderr, b"err");
        assert_eq!(result.user, "core");
    }

    #[test]
    fn test_transport_error_keeps_partial_output() {
        let failure = finish(
            base(),
            Ok(raw(ExitOutcome::TransportError("connection lost".into()))),
        )
        .unwrap_err();

        assert_eq!(failure.result.code, 0);
        assert_eq!(failure.result.stdout, b"out");
        assert!(matches!(
            failure.error,
            ExecError::Transport { ref reason, .. } if reason == "connection lost"
        ));
    }

    #[test]
    fn test_early_failure_keeps_request_fields() {
        let failure = finish(
            base(),
            Err(ExecError::Timeout {
                timeout: std::time::Duration::from_secs(1),
            }),
        )
        .unwrap_err();

        assert_eq!(failure.result.host, "10.0.0.1:22");
        assert_eq!(failure.result.command, "uptime");
        assert!(failure.result.stdout.is_empty());
        assert_eq!(
            failure.to_string(),
            "ssh core@10.0.0.1:22: execution timed out after 1s"
        );
    }
}
