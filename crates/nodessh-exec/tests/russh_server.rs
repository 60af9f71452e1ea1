use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nodessh_exec::*;
use russh::keys::decode_secret_key;
use russh::keys::ssh_key::PublicKey;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use tokio::net::{TcpListener, TcpStream};

const FIXTURE_KEY: &str = include_str!("fixtures/id_ed25519");

const STDOUT: &[u8] = b"out\n\x00\xff";
const STDERR: &[u8] = b"err\n";

/// Sessions a test server accepted and saw end
#[derive(Default)]
struct Sessions {
    accepted: AtomicUsize,
    closed: AtomicUsize,
}

impl Sessions {
    async fn wait_closed(&self, expected: usize) {
        for _ in 0..500 {
            if self.closed.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "{} of {expected} sessions closed",
            self.closed.load(Ordering::SeqCst)
        );
    }
}

/// Server behavior
#[derive(Clone, Copy)]
struct Node {
    /// Exit status sent after the output, none to leave it out
    exit_status: Option<u32>,
    /// Proxy direct-tcpip channels to the requested address
    forwards: bool,
}

impl Node {
    fn target(exit_status: Option<u32>) -> Self {
        Self {
            exit_status,
            forwards: false,
        }
    }

    fn bastion(forwards: bool) -> Self {
        Self {
            exit_status: Some(0),
            forwards,
        }
    }
}

impl server::Handler for Node {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, _: &str, _: &PublicKey) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if !self.forwards {
            return Ok(false);
        }
        let addr = format!("{host_to_connect}:{port_to_connect}");
        tokio::spawn(async move {
            if let Ok(mut tcp) = TcpStream::connect(addr).await {
                let mut stream = channel.into_stream();
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut tcp).await;
            }
        });
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        session.data(channel, CryptoVec::from_slice(STDOUT))?;
        session.extended_data(channel, 1, CryptoVec::from_slice(STDERR))?;
        if let Some(status) = self.exit_status {
            session.exit_status_request(channel, status)?;
        }
        session.eof(channel)?;
        session.close(channel)?;
        Ok(())
    }
}

/// Start a server on a random local port
async fn serve(node: Node) -> (String, Arc<Sessions>) {
    let mut config = server::Config::default();
    config.keys.push(decode_secret_key(FIXTURE_KEY, None).unwrap());
    config.auth_rejection_time = Duration::from_millis(10);
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let sessions = Arc::new(Sessions::default());

    let counters = Arc::clone(&sessions);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counters.accepted.fetch_add(1, Ordering::SeqCst);
            let config = Arc::clone(&config);
            let counters = Arc::clone(&counters);
            tokio::spawn(async move {
                if let Ok(session) = server::run_stream(config, socket, node).await {
                    let _ = session.await;
                }
                counters.closed.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    (addr, sessions)
}

fn credential(dir: &tempfile::TempDir) -> Credential {
    let path = dir.path().join("id_ed25519");
    std::fs::write(&path, FIXTURE_KEY).unwrap();
    Credential::from_file(path).unwrap()
}

fn executor() -> Executor {
    Executor::new(
        ExecSettings::default()
            .with_user("core")
            .with_dial_policy(DialPolicy {
                handshake_timeout: Duration::from_secs(5),
                retry_interval: Duration::from_millis(50),
                retry_window: Duration::from_millis(200),
            }),
    )
}

#[tokio::test]
async fn test_bastion_exit_status_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let (target, target_sessions) = serve(Node::target(Some(7))).await;
    let (bastion, bastion_sessions) = serve(Node::bastion(true)).await;

    let result = executor()
        .execute_via_bastion("exit 7", "core", &bastion, &target, &credential(&dir))
        .await
        .unwrap();

    assert_eq!(result.code, 7);
    assert_eq!(result.stdout, STDOUT);
    assert_eq!(result.stderr, STDERR);
    assert_eq!(result.host, target);

    bastion_sessions.wait_closed(1).await;
    target_sessions.wait_closed(1).await;
    assert_eq!(bastion_sessions.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(target_sessions.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_direct_exit_status_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let (target, sessions) = serve(Node::target(Some(7))).await;

    let result = executor()
        .execute_direct("exit 7", "core", &target, &credential(&dir))
        .await
        .unwrap();

    assert_eq!(result.code, 7);
    assert_eq!(result.stdout, STDOUT);
    assert_eq!(result.stderr, STDERR);
    sessions.wait_closed(1).await;
}

#[tokio::test]
async fn test_rejected_forward_closes_bastion() {
    let dir = tempfile::tempdir().unwrap();
    let (target, target_sessions) = serve(Node::target(Some(0))).await;
    let (bastion, bastion_sessions) = serve(Node::bastion(false)).await;

    let failure = executor()
        .execute_via_bastion("true", "core", &bastion, &target, &credential(&dir))
        .await
        .unwrap_err();

    match &failure.error {
        ExecError::Forward {
            bastion: via,
            target: to,
            ..
        } => {
            assert_eq!(via, &bastion);
            assert_eq!(to, &target);
        }
        other => panic!("unexpected {other:?}"),
    }
    bastion_sessions.wait_closed(1).await;
    assert_eq!(target_sessions.accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_target_is_forward_error() {
    let dir = tempfile::tempdir().unwrap();
    let (bastion, bastion_sessions) = serve(Node::bastion(true)).await;

    let failure = executor()
        .execute_via_bastion("true", "core", &bastion, "no-port", &credential(&dir))
        .await
        .unwrap_err();

    assert!(
        matches!(failure.error, ExecError::Forward { ref target, .. } if target == "no-port"),
        "got {:?}",
        failure.error
    );
    bastion_sessions.wait_closed(1).await;
}

#[tokio::test]
async fn test_missing_exit_status_is_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    let (target, target_sessions) = serve(Node::target(None)).await;
    let (bastion, bastion_sessions) = serve(Node::bastion(true)).await;

    let failure = executor()
        .execute_via_bastion("true", "core", &bastion, &target, &credential(&dir))
        .await
        .unwrap_err();

    assert!(
        matches!(failure.error, ExecError::Transport { .. }),
        "got {:?}",
        failure.error
    );
    assert_eq!(failure.result.code, 0);
    assert_eq!(failure.result.stdout, STDOUT);

    bastion_sessions.wait_closed(1).await;
    target_sessions.wait_closed(1).await;
}
