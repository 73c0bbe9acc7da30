//! Manager-interface sessions: connect, log in, stream call events

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::callstatus::StatusPublisher;
use crate::config::PbxConfig;
use crate::constants::{
    CONNECT_TIMEOUT_SECS, PROBE_TIMEOUT_SECS, READ_POLL_TIMEOUT_SECS, SOCKET_BUF_SIZE,
};
use crate::error::{ListenerError, ListenerResult};
use crate::listener::{ListenerState, NoticeSender};
use crate::protocol::{login_action, AmiBlock, AmiParser};

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(
    host: &str,
    port: u16,
    timeout_secs: u64,
) -> ListenerResult<TcpStream> {
    let tcp_result = timeout(
        Duration::from_secs(timeout_secs),
        TcpStream::connect((host, port)),
    )
    .await;

    match tcp_result {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(ListenerError::connection(format!(
                "connect to {}:{} failed: {}",
                host, port, e
            )))
        }
        Err(_) => {
            warn!("[CONNECT] TCP connect timed out after {}s", timeout_secs);
            Err(ListenerError::connection(format!(
                "connect to {}:{} timed out after {}s",
                host, port, timeout_secs
            )))
        }
    }
}

/// Read a single protocol block from the socket into the parser.
async fn recv_block(
    stream: &mut TcpStream,
    parser: &mut AmiParser,
    read_buffer: &mut [u8],
    timeout_secs: u64,
) -> ListenerResult<AmiBlock> {
    loop {
        if let Some(block) = parser.next_block() {
            trace!("[RECV] Parsed block from buffer");
            return Ok(block);
        }

        let read_result = timeout(
            Duration::from_secs(timeout_secs),
            stream.read(read_buffer),
        )
        .await;

        let bytes_read = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                return Err(ListenerError::connection(format!("read failed: {}", e)));
            }
            Err(_) => {
                return Err(ListenerError::connection(format!(
                    "no response within {}s",
                    timeout_secs
                )));
            }
        };

        if bytes_read == 0 {
            return Err(ListenerError::connection("connection closed during handshake"));
        }

        parser.add_data(&read_buffer[..bytes_read])?;
    }
}

/// Send the login action and check the response.
///
/// The greeting banner carries no terminating blank line of its own, so the
/// first complete block holds both the banner and the login response; the
/// acceptance check scans the whole block.
async fn login(
    stream: &mut TcpStream,
    parser: &mut AmiParser,
    read_buffer: &mut [u8],
    pbx: &PbxConfig,
    subscribe: bool,
    timeout_secs: u64,
) -> ListenerResult<()> {
    let action = login_action(&pbx.username, &pbx.secret, subscribe)?;
    debug!("[AUTH] Sending login for {} [REDACTED]", pbx.username);
    stream
        .write_all(action.as_bytes())
        .await
        .map_err(|e| ListenerError::connection(format!("failed to send login: {}", e)))?;

    let block = recv_block(stream, parser, read_buffer, timeout_secs).await?;
    if !block.is_auth_accepted() {
        let reason = block
            .field("Message")
            .unwrap_or("login rejected")
            .to_string();
        warn!("[AUTH] Login rejected for {}: {}", pbx.username, reason);
        return Err(ListenerError::auth_failed(reason));
    }

    debug!("[AUTH] Login accepted for {}", pbx.username);
    Ok(())
}

/// Run one monitoring session: connect, log in, then stream events until the
/// token is cancelled or the session fails.
///
/// Returns `Ok(())` only on cancellation; every other exit is an error the
/// caller can retry.
pub(crate) async fn run_session(
    token: &CancellationToken,
    pbx: &PbxConfig,
    extension: &str,
    publisher: &StatusPublisher,
    notices: &NoticeSender,
) -> ListenerResult<()> {
    info!("[CONNECT] Connecting to {}:{}", pbx.host, pbx.port);
    let mut stream = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        r = tcp_connect_with_timeout(&pbx.host, pbx.port, CONNECT_TIMEOUT_SECS) => r?,
    };

    let mut parser = AmiParser::new();
    let mut read_buffer = [0u8; SOCKET_BUF_SIZE];
    let auth = login(&mut stream, &mut parser, &mut read_buffer, pbx, true, CONNECT_TIMEOUT_SECS);
    tokio::select! {
        _ = token.cancelled() => return Ok(()),
        r = auth => r?,
    }

    info!(
        "[CONNECT] Logged in to {}:{} as {}",
        pbx.host, pbx.port, pbx.username
    );
    notices.set_state(ListenerState::Connected);

    stream_events(token, stream, parser, extension, publisher, notices).await
}

/// Stream call events from an authenticated session.
async fn stream_events(
    token: &CancellationToken,
    mut stream: TcpStream,
    mut parser: AmiParser,
    extension: &str,
    publisher: &StatusPublisher,
    notices: &NoticeSender,
) -> ListenerResult<()> {
    let mut read_buffer = [0u8; SOCKET_BUF_SIZE];

    loop {
        // Drain every complete block before touching the socket again
        while let Some(block) = parser.next_block() {
            let event = match block.to_call_event() {
                Some(event) => event,
                None => {
                    trace!("[RECV] Skipping non-call block: {:?}", block.text());
                    continue;
                }
            };
            if !event.concerns(extension) {
                trace!("[RECV] Ignoring event for another extension: {}", event);
                continue;
            }
            debug!("[RECV] {}", event);
            notices.call(event.clone());
            publisher
                .apply(&event)
                .await;
        }

        let read_result = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            r = timeout(
                Duration::from_secs(READ_POLL_TIMEOUT_SECS),
                stream.read(&mut read_buffer),
            ) => r,
        };

        match read_result {
            Ok(Ok(0)) => {
                info!("[RECV] Connection closed by server");
                return Err(ListenerError::stream("connection closed by server"));
            }
            Ok(Ok(n)) => {
                trace!("[RECV] Read {} bytes", n);
                parser.add_data(&read_buffer[..n])?;
            }
            Ok(Err(e)) => {
                warn!("[RECV] Read error: {}", e);
                return Err(ListenerError::stream(format!("read failed: {}", e)));
            }
            Err(_) => {
                // Quiet line, poll again
            }
        }
    }
}

/// Check that the manager interface is reachable and the credentials are
/// accepted, without subscribing to events.
///
/// Useful as a configuration check before calling
/// [`start`](crate::CallListener::start).
pub async fn probe_connection(pbx: &PbxConfig) -> ListenerResult<()> {
    info!("[PROBE] Checking {}:{}", pbx.host, pbx.port);
    let mut stream = tcp_connect_with_timeout(&pbx.host, pbx.port, PROBE_TIMEOUT_SECS).await?;
    let mut parser = AmiParser::new();
    let mut read_buffer = [0u8; SOCKET_BUF_SIZE];
    login(
        &mut stream,
        &mut parser,
        &mut read_buffer,
        pbx,
        false,
        PROBE_TIMEOUT_SECS,
    )
    .await?;

    let _ = stream
        .shutdown()
        .await;
    info!("[PROBE] Credentials accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const ACCEPT_RESPONSE: &[u8] = b"Asterisk Call Manager/5.0.2\r\nResponse: Success\r\n\
        Message: Authentication accepted\r\n\r\n";
    const REJECT_RESPONSE: &[u8] = b"Asterisk Call Manager/5.0.2\r\nResponse: Error\r\n\
        Message: Authentication failed\r\n\r\n";

    fn test_pbx(port: u16) -> PbxConfig {
        PbxConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "monitor".to_string(),
            secret: "secret".to_string(),
            enabled: true,
        }
    }

    /// Accept one connection, answer the login with `response`, and return
    /// what the client sent.
    async fn one_shot_server(listener: TcpListener, response: &'static [u8]) -> String {
        let (mut sock, _) = listener
            .accept()
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let n = sock
            .read(&mut buf)
            .await
            .unwrap();
        sock
            .write_all(response)
            .await
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[tokio::test]
    async fn test_login_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let port = listener
            .local_addr()
            .unwrap()
            .port();
        let server = tokio::spawn(one_shot_server(listener, ACCEPT_RESPONSE));

        let pbx = test_pbx(port);
        let mut stream = tcp_connect_with_timeout(&pbx.host, pbx.port, 5)
            .await
            .unwrap();
        let mut parser = AmiParser::new();
        let mut read_buffer = [0u8; SOCKET_BUF_SIZE];
        login(&mut stream, &mut parser, &mut read_buffer, &pbx, true, 5)
            .await
            .unwrap();

        let request = server
            .await
            .unwrap();
        assert!(request.starts_with("Action: Login\r\n"));
        assert!(request.contains("Events: on\r\n"));
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let port = listener
            .local_addr()
            .unwrap()
            .port();
        let server = tokio::spawn(one_shot_server(listener, REJECT_RESPONSE));

        let pbx = test_pbx(port);
        let mut stream = tcp_connect_with_timeout(&pbx.host, pbx.port, 5)
            .await
            .unwrap();
        let mut parser = AmiParser::new();
        let mut read_buffer = [0u8; SOCKET_BUF_SIZE];
        let err = login(&mut stream, &mut parser, &mut read_buffer, &pbx, true, 5)
            .await
            .unwrap_err();

        assert!(matches!(err, ListenerError::Authentication { .. }));
        assert_eq!(err.to_string(), "authentication failed: Authentication failed");
        server
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_skips_event_subscription() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let port = listener
            .local_addr()
            .unwrap()
            .port();
        let server = tokio::spawn(one_shot_server(listener, ACCEPT_RESPONSE));

        probe_connection(&test_pbx(port))
            .await
            .unwrap();

        let request = server
            .await
            .unwrap();
        assert!(request.starts_with("Action: Login\r\n"));
        assert!(!request.contains("Events:"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind and drop to get a port with nothing listening on it
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let port = listener
            .local_addr()
            .unwrap()
            .port();
        drop(listener);

        let err = tcp_connect_with_timeout("127.0.0.1", port, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ListenerError::Connection { .. }));
    }
}
