//! Command execution through a bastion host
//!
//! The bastion path stacks four resources: the control connection to the
//! bastion, a forwarded stream from the bastion to the target, a second SSH
//! connection negotiated over that stream, and the command session on it.
//! Each layer is acquired inside its parent's scope and released before the
//! parent, whichever step fails.

use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use crate::config::DialPolicy;
use crate::error::ExecError;
use crate::executor::ExecutionRequest;
use crate::keys::Credential;
use crate::result::RawOutput;
use crate::traits::SshTransport;

/// Connect to `host`, retrying within the policy's window
///
/// The window starts when the first attempt fails. Retries are spaced by
/// `retry_interval` and each one is capped by what is left of the window, so
/// the loop gives up at most one interval after the window closes. The
/// returned error is the last attempt's, with the attempt count filled in.
/// The policy is clamped first, so a zero interval still pauses between
/// attempts and an oversized window cannot overflow the clock.
///
/// # Errors
/// Returns the last connection error once the window is exhausted
#[instrument(skip(transport, credential, policy), fields(bastion = %host))]
pub async fn dial_with_retry<T: SshTransport>(
    transport: &T,
    host: &str,
    user: &str,
    credential: &Credential,
    policy: &DialPolicy,
) -> Result<T::Connection, ExecError> {
    let policy = policy.clamped();
    let mut last = match transport
        .connect(host, user, credential, policy.handshake_timeout)
        .await
    {
        Ok(conn) => return Ok(conn),
        Err(e) => e,
    };

    let deadline = Instant::now() + policy.retry_window;
    let mut attempts: u32 = 1;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        warn!(user = %user, attempt = attempts, error = %last, "error dialing bastion, retrying");
        sleep(policy.retry_interval.min(deadline - now)).await;

        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(policy.retry_interval);
        attempts += 1;

        match transport
            .connect(host, user, credential, policy.handshake_timeout.min(remaining))
            .await
        {
            Ok(conn) => {
                info!(attempts, "bastion reachable");
                return Ok(conn);
            }
            Err(e) => last = e,
        }
    }

    if let ExecError::Dial { attempts: n, .. } = &mut last {
        *n = attempts;
    }
    warn!(user = %user, attempts, error = %last, "giving up on bastion");
    Err(last)
}

/// Run a request through its bastion
///
/// # Errors
/// Returns `Dial`/`Handshake` for the control connection, `Forward` when the
/// bastion cannot reach the target, `Handshake` for the tunneled connection
/// and `Transport` when the session cannot be started
pub async fn run_via_bastion<T: SshTransport>(
    transport: &T,
    request: &ExecutionRequest,
    bastion: &str,
    credential: &Credential,
    policy: &DialPolicy,
) -> Result<RawOutput, ExecError> {
    let control = dial_with_retry(transport, bastion, &request.user, credential, policy).await?;

    let outcome = forward_and_run(transport, &control, request, credential, policy).await;

    debug!(bastion = %bastion, "closing bastion connection");
    transport.close(control).await;
    outcome
}

/// Everything that lives inside the control connection
async fn forward_and_run<T: SshTransport>(
    transport: &T,
    control: &T::Connection,
    request: &ExecutionRequest,
    credential: &Credential,
    policy: &DialPolicy,
) -> Result<RawOutput, ExecError> {
    let tunnel = transport.open_tunnel(control, &request.host).await?;

    // the tunneled connection takes ownership of the stream
    let target = transport
        .connect_tunnel(
            tunnel,
            &request.host,
            &request.user,
            credential,
            policy.handshake_timeout,
        )
        .await?;

    let outcome = transport.run(&target, &request.command).await;

    debug!(host = %request.host, "closing tunneled connection");
    transport.close(target).await;
    outcome
}
