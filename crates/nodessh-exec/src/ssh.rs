//! SSH transport using russh crate

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg, Disconnect, Sig, client};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::hosts::split_host_port;
use crate::keys::Credential;
use crate::result::{RawOutput, classify_exit};
use crate::traits::SshTransport;

/// How long a disconnect may take before the connection is simply dropped
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

/// Authenticated russh connection
pub struct SshConnection {
    handle: client::Handle<SshClientHandler>,
    host: String,
    user: String,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("host", &self.host)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// [`SshTransport`] backed by russh
#[derive(Clone)]
pub struct RusshTransport {
    config: Arc<client::Config>,
}

impl RusshTransport {
    /// Create a transport with the default client configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(client::Config::default())
    }

    /// Create a transport with a custom client configuration
    #[must_use]
    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Handshake and authenticate over any byte stream
    async fn handshake<S>(
        &self,
        stream: S,
        host: &str,
        user: &str,
        credential: &Credential,
    ) -> Result<SshConnection, ExecError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut handle =
            client::connect_stream(Arc::clone(&self.config), stream, SshClientHandler)
                .await
                .map_err(|e| handshake_error(user, host, e.to_string()))?;

        if let Err(e) = authenticate(&mut handle, user, credential).await {
            disconnect(&handle, host).await;
            return Err(handshake_error(user, host, e));
        }

        debug!(host = %host, user = %user, "SSH connected and authenticated");

        Ok(SshConnection {
            handle,
            host: host.to_string(),
            user: user.to_string(),
        })
    }
}

impl Default for RusshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RusshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshTransport").finish_non_exhaustive()
    }
}

fn handshake_error(user: &str, host: &str, reason: String) -> ExecError {
    ExecError::Handshake {
        user: user.to_string(),
        host: host.to_string(),
        reason,
    }
}

async fn authenticate(
    handle: &mut client::Handle<SshClientHandler>,
    user: &str,
    credential: &Credential,
) -> Result<(), String> {
    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .ok()
        .flatten()
        .flatten();
    let auth_res = handle
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(credential.key(), hash_alg))
        .await
        .map_err(|e| e.to_string())?;

    if !auth_res.success() {
        return Err("public key authentication failed".to_string());
    }
    Ok(())
}

async fn disconnect(handle: &client::Handle<SshClientHandler>, host: &str) {
    match timeout(
        DISCONNECT_TIMEOUT,
        handle.disconnect(Disconnect::ByApplication, "", "English"),
    )
    .await
    {
        Ok(Ok(())) => debug!(host = %host, "SSH disconnected"),
        Ok(Err(e)) => debug!(host = %host, error = %e, "disconnect failed, dropping connection"),
        Err(_) => warn!(host = %host, "timeout closing SSH connection, dropping it"),
    }
}

fn signal_name(sig: &Sig) -> String {
    match sig {
        Sig::ABRT => "ABRT",
        Sig::ALRM => "ALRM",
        Sig::FPE => "FPE",
        Sig::HUP => "HUP",
        Sig::ILL => "ILL",
        Sig::INT => "INT",
        Sig::KILL => "KILL",
        Sig::PIPE => "PIPE",
        Sig::QUIT => "QUIT",
        Sig::SEGV => "SEGV",
        Sig::TERM => "TERM",
        Sig::USR1 => "USR1",
        Sig::Custom(name) => name.as_str(),
    }
    .to_string()
}

#[async_trait]
impl SshTransport for RusshTransport {
    type Connection = SshConnection;
    type Tunnel = Channel<client::Msg>;

    #[instrument(skip(self, credential))]
    async fn connect(
        &self,
        host: &str,
        user: &str,
        credential: &Credential,
        timeout_duration: Duration,
    ) -> Result<SshConnection, ExecError> {
        let dial_error = |reason: String| ExecError::Dial {
            user: user.to_string(),
            host: host.to_string(),
            attempts: 1,
            reason,
        };

        info!(host = %host, user = %user, "connecting to SSH");

        // one budget for TCP connect and handshake; the flag tells which stage ran out
        let tcp_up = AtomicBool::new(false);
        let attempt = async {
            let tcp = TcpStream::connect(host)
                .await
                .map_err(|e| dial_error(e.to_string()))?;
            tcp_up.store(true, Ordering::Relaxed);
            if let Err(e) = tcp.set_nodelay(true) {
                debug!(host = %host, error = %e, "failed to set TCP_NODELAY");
            }
            self.handshake(tcp, host, user, credential).await
        };

        match timeout(timeout_duration, attempt).await {
            Ok(conn) => conn,
            Err(_) => {
                let reason = format!("timed out after {timeout_duration:?}");
                if tcp_up.load(Ordering::Relaxed) {
                    Err(handshake_error(user, host, reason))
                } else {
                    Err(dial_error(reason))
                }
            }
        }
    }

    #[instrument(skip(self, via), fields(bastion = %via.host))]
    async fn open_tunnel(
        &self,
        via: &SshConnection,
        target: &str,
    ) -> Result<Channel<client::Msg>, ExecError> {
        let forward_error = |reason: String| ExecError::Forward {
            bastion: via.host.clone(),
            target: target.to_string(),
            reason,
        };

        let (host, port) = split_host_port(target).map_err(|e| forward_error(e.to_string()))?;

        debug!(target = %target, "opening tunnel through bastion");

        via.handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| forward_error(e.to_string()))
    }

    #[instrument(skip(self, tunnel, credential))]
    async fn connect_tunnel(
        &self,
        tunnel: Channel<client::Msg>,
        target: &str,
        user: &str,
        credential: &Credential,
        timeout_duration: Duration,
    ) -> Result<SshConnection, ExecError> {
        timeout(
            timeout_duration,
            self.handshake(tunnel.into_stream(), target, user, credential),
        )
        .await
        .map_err(|_| {
            handshake_error(user, target, format!("timed out after {timeout_duration:?}"))
        })?
    }

    #[instrument(skip(self, conn, command), fields(host = %conn.host))]
    async fn run(&self, conn: &SshConnection, command: &str) -> Result<RawOutput, ExecError> {
        let transport_error = |reason: String| ExecError::Transport {
            user: conn.user.clone(),
            host: conn.host.clone(),
            command: command.to_string(),
            reason,
        };

        debug!(command = %command, "executing remote command");

        let mut channel = conn
            .handle
            .channel_open_session()
            .await
            .map_err(|e| transport_error(format!("error creating session: {e}")))?;

        if let Err(e) = channel.exec(true, command).await {
            let _ = channel.close().await;
            return Err(transport_error(e.to_string()));
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        let mut exit_signal = None;

        // ExitStatus may arrive after Eof, so drain until the channel closes
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::ExitSignal { signal_name: sig, .. } => {
                    exit_signal = Some(signal_name(&sig));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        if let Err(e) = channel.close().await {
            debug!(error = %e, "session already closed");
        }

        let outcome = classify_exit(exit_status, exit_signal.as_deref());

        debug!(
            command = %command,
            outcome = ?outcome,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "remote command completed"
        );

        Ok(RawOutput {
            stdout,
            stderr,
            outcome,
        })
    }

    async fn close(&self, conn: SshConnection) {
        disconnect(&conn.handle, &conn.host).await;
    }
}
