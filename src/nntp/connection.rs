//! A single stateful NNTP conversation
//!
//! One [`NntpConnection`] frames one persistent TCP (optionally TLS)
//! conversation with one server: greeting, `AUTHINFO USER`/`PASS`,
//! `GROUP`, `ARTICLE`, `QUIT`. Article bodies are streamed line-by-line with
//! dot-unstuffing applied, so the yEnc decoder never sees stuffed dots.
//!
//! Cancellation is cooperative: the connection carries a
//! [`CancellationToken`]; cancelling it makes any in-flight read return as if
//! the stream ended.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::ArticleError;

/// Classification of an NNTP three-digit status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx
    Success,
    /// 400/499: server busy or closing; transient
    Transient,
    /// 411/412/430/423: permanently unavailable on this server
    NotFound,
    /// 480/481 authentication trouble
    AuthError,
    /// Anything else outside 2xx
    Failed,
}

/// Classify a three-digit NNTP status code.
///
/// `411`/`412` cover the group context, `430`/`423` the article itself;
/// both mean "advance to the next server level". `400` and `499` are
/// transient. Authentication troubles are detected separately and promoted to
/// connect errors by the caller.
pub fn classify_status(code: u16) -> ResponseClass {
    match code {
        200..=299 => ResponseClass::Success,
        400 | 499 => ResponseClass::Transient,
        411 | 412 | 423 | 430 => ResponseClass::NotFound,
        480 | 481 => ResponseClass::AuthError,
        _ => ResponseClass::Failed,
    }
}

/// Outcome of reading one article body line.
#[derive(Debug, PartialEq, Eq)]
pub enum BodyLine {
    /// One unstuffed line, terminator stripped; `raw_len` is the wire length
    /// including the terminator, for byte accounting
    Data {
        /// Line content without terminator, dot-unstuffed
        line: Vec<u8>,
        /// Bytes consumed from the wire
        raw_len: usize,
    },
    /// The terminating `.` line
    End,
}

/// A single NNTP socket with its protocol state.
pub struct NntpConnection {
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    current_group: Option<String>,
    last_response: Option<String>,
    cancel: CancellationToken,
    read_timeout: Duration,
}

impl NntpConnection {
    /// Connect and read the server greeting. Does not authenticate.
    pub async fn connect(
        server: &ServerConfig,
        read_timeout: Duration,
        tls_connector: Option<Arc<TlsConnector>>,
    ) -> Result<Self, ArticleError> {
        let addr = format!("{}:{}", server.host, server.port);

        let tcp_stream = timeout(Duration::from_secs(30), TcpStream::connect(&addr))
            .await
            .map_err(|_| ArticleError::ConnectError(format!("connect timeout to {addr}")))?
            .map_err(|e| ArticleError::ConnectError(format!("connect to {addr}: {e}")))?;

        tcp_stream
            .set_nodelay(true)
            .map_err(|e| ArticleError::ConnectError(format!("set_nodelay: {e}")))?;

        let (reader, writer): (
            Box<dyn AsyncRead + Unpin + Send>,
            Box<dyn AsyncWrite + Unpin + Send>,
        ) = if server.tls {
            let connector = match tls_connector {
                Some(shared) => shared,
                None => {
                    let native = native_tls::TlsConnector::new()
                        .map_err(|e| ArticleError::ConnectError(format!("TLS init: {e}")))?;
                    Arc::new(TlsConnector::from(native))
                }
            };
            let tls_stream = timeout(
                Duration::from_secs(30),
                connector.connect(&server.host, tcp_stream),
            )
            .await
            .map_err(|_| ArticleError::ConnectError(format!("TLS handshake timeout to {addr}")))?
            .map_err(|e| ArticleError::ConnectError(format!("TLS handshake: {e}")))?;
            let (read_half, write_half) = tokio::io::split(tls_stream);
            (Box::new(read_half), Box::new(write_half))
        } else {
            let (read_half, write_half) = tokio::io::split(tcp_stream);
            (Box::new(read_half), Box::new(write_half))
        };

        let mut conn = Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
            writer,
            current_group: None,
            last_response: None,
            cancel: CancellationToken::new(),
            read_timeout,
        };

        let greeting = conn.read_response().await?;
        let code = Self::status_code(&greeting);
        if !matches!(code, 200 | 201) {
            return Err(ArticleError::ConnectError(format!(
                "server greeting failed: {greeting}"
            )));
        }

        Ok(conn)
    }

    /// Token observed by every read; cancelling it unblocks the connection.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal cancellation. Any in-flight read returns as end-of-stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The last raw status line read from the server.
    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// The currently joined group, if any.
    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    /// Authenticate with `AUTHINFO USER` / `AUTHINFO PASS`.
    ///
    /// Authentication failures are promoted to [`ArticleError::ConnectError`]
    /// so the retry loop treats them as server trouble, not article trouble.
    pub async fn authenticate(&mut self, server: &ServerConfig) -> Result<(), ArticleError> {
        let Some(username) = server.username.as_deref() else {
            return Ok(());
        };

        self.send_command(&format!("AUTHINFO USER {username}"))
            .await?;
        let response = self.read_response().await?;
        let code = Self::status_code(&response);

        if code == 381 {
            let password = server.password.as_deref().unwrap_or("");
            self.send_command(&format!("AUTHINFO PASS {password}"))
                .await?;
            let response = self.read_response().await?;
            if Self::status_code(&response) != 281 {
                // keep the code only; the full response may echo credentials
                let sanitized = response.split_whitespace().next().unwrap_or("unknown");
                return Err(ArticleError::ConnectError(format!(
                    "authentication failed ({sanitized})"
                )));
            }
        } else if code != 281 {
            let sanitized = response.split_whitespace().next().unwrap_or("unknown");
            return Err(ArticleError::ConnectError(format!(
                "authentication failed ({sanitized})"
            )));
        }

        Ok(())
    }

    /// Select a newsgroup. Re-joining the current group is a no-op.
    pub async fn join_group(&mut self, group: &str) -> Result<(), ArticleError> {
        if self.current_group.as_deref() == Some(group) {
            return Ok(());
        }
        self.send_command(&format!("GROUP {group}")).await?;
        let response = self.read_response().await?;
        let code = Self::status_code(&response);
        match classify_status(code) {
            ResponseClass::Success => {
                self.current_group = Some(group.to_string());
                Ok(())
            }
            ResponseClass::NotFound => Err(ArticleError::NotFound(format!(
                "group {group} not available ({code})"
            ))),
            ResponseClass::Transient => Err(ArticleError::ConnectError(format!(
                "GROUP {group}: {response}"
            ))),
            ResponseClass::AuthError => Err(ArticleError::ConnectError(format!(
                "GROUP {group}: {response}"
            ))),
            ResponseClass::Failed => {
                Err(ArticleError::Failed(format!("GROUP {group}: {response}")))
            }
        }
    }

    /// Request an article and consume its header section.
    ///
    /// On a 2xx response the headers are read up to the empty separator line;
    /// if a `Message-ID:` header is present and differs from the requested id
    /// the attempt is reported as failed without consuming the body. After a
    /// successful return the caller streams body lines via
    /// [`read_body_line`](Self::read_body_line).
    pub async fn request_article(&mut self, message_id: &str) -> Result<(), ArticleError> {
        let bracketed = if message_id.starts_with('<') {
            message_id.to_string()
        } else {
            format!("<{message_id}>")
        };
        self.send_command(&format!("ARTICLE {bracketed}")).await?;
        let response = self.read_response().await?;
        let code = Self::status_code(&response);
        match classify_status(code) {
            ResponseClass::Success => {}
            ResponseClass::NotFound => {
                return Err(ArticleError::NotFound(format!(
                    "article {bracketed} not available ({code})"
                )));
            }
            ResponseClass::Transient | ResponseClass::AuthError => {
                return Err(ArticleError::ConnectError(format!(
                    "ARTICLE {bracketed}: {response}"
                )));
            }
            ResponseClass::Failed => {
                return Err(ArticleError::Failed(format!(
                    "ARTICLE {bracketed}: {response}"
                )));
            }
        }

        // header section: up to the first empty line
        loop {
            match self.read_body_line().await? {
                BodyLine::End => {
                    return Err(ArticleError::Incomplete(
                        "article ended inside the header section".to_string(),
                    ));
                }
                BodyLine::Data { line, .. } => {
                    if line.is_empty() {
                        return Ok(());
                    }
                    let text = String::from_utf8_lossy(&line);
                    if let Some(value) = text
                        .strip_prefix("Message-ID:")
                        .or_else(|| text.strip_prefix("Message-Id:"))
                        .or_else(|| text.strip_prefix("message-id:"))
                    {
                        let announced = value.trim();
                        if !announced.is_empty() && announced != bracketed {
                            return Err(ArticleError::Failed(format!(
                                "message-id mismatch: requested {bracketed}, got {announced}"
                            )));
                        }
                    }
                }
            }
        }
    }

    /// Read one body line, unstuffing a doubled leading dot; `BodyLine::End`
    /// marks the lone-`.` terminator.
    pub async fn read_body_line(&mut self) -> Result<BodyLine, ArticleError> {
        let raw = self.read_raw_line().await?;
        let raw_len = raw.len();
        if raw_len == 0 {
            return Err(ArticleError::Incomplete(
                "connection closed mid-article".to_string(),
            ));
        }
        let mut line = raw;
        // strip terminator
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
        } else if line.ends_with(b"\n") {
            line.truncate(line.len() - 1);
        }
        if line == b"." {
            return Ok(BodyLine::End);
        }
        // strip one leading dot iff the line begins with ".."
        if line.starts_with(b"..") {
            line.remove(0);
        }
        Ok(BodyLine::Data { line, raw_len })
    }

    /// Gracefully close with `QUIT`.
    pub async fn disconnect(&mut self) {
        if self.send_command("QUIT").await.is_ok() {
            let _ = timeout(Duration::from_secs(2), self.read_response()).await;
        }
        let _ = self.writer.shutdown().await;
    }

    async fn send_command(&mut self, command: &str) -> Result<(), ArticleError> {
        if self.cancel.is_cancelled() {
            return Err(ArticleError::Cancelled);
        }
        let cancel = self.cancel.clone();
        let write = async {
            self.writer.write_all(command.as_bytes()).await?;
            self.writer.write_all(b"\r\n").await?;
            self.writer.flush().await
        };
        tokio::select! {
            result = write => {
                result.map_err(|e| ArticleError::ConnectError(format!("write: {e}")))
            }
            _ = cancel.cancelled() => Err(ArticleError::Cancelled),
        }
    }

    async fn read_response(&mut self) -> Result<String, ArticleError> {
        let raw = self.read_raw_line().await?;
        if raw.is_empty() {
            return Err(ArticleError::ConnectError(
                "connection closed by server".to_string(),
            ));
        }
        let mut text = String::from_utf8_lossy(&raw).into_owned();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        self.last_response = Some(text.clone());
        Ok(text)
    }

    /// Read one raw line including its terminator. An empty vec means EOF.
    async fn read_raw_line(&mut self) -> Result<Vec<u8>, ArticleError> {
        use tokio::io::AsyncBufReadExt;

        enum ReadOutcome {
            Read,
            Error(std::io::Error),
            TimedOut,
            Cancelled,
        }

        let cancel = self.cancel.clone();
        let read_timeout = self.read_timeout;
        let mut line = Vec::new();
        let outcome = {
            let read = self.reader.read_until(b'\n', &mut line);
            tokio::select! {
                result = timeout(read_timeout, read) => match result {
                    Ok(Ok(_)) => ReadOutcome::Read,
                    Ok(Err(e)) => ReadOutcome::Error(e),
                    Err(_) => ReadOutcome::TimedOut,
                },
                _ = cancel.cancelled() => ReadOutcome::Cancelled,
            }
        };
        match outcome {
            ReadOutcome::Read => Ok(line),
            ReadOutcome::Error(e) => Err(ArticleError::ConnectError(format!("read: {e}"))),
            ReadOutcome::TimedOut => Err(ArticleError::ConnectError(format!(
                "read timeout after {read_timeout:?}"
            ))),
            ReadOutcome::Cancelled => Err(ArticleError::Cancelled),
        }
    }

    /// Probe liveness before reusing a pooled connection.
    pub async fn is_healthy(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        // DATE is cheap, stateless, and universally supported
        if self.send_command("DATE").await.is_err() {
            return false;
        }
        match timeout(Duration::from_secs(5), self.read_response()).await {
            Ok(Ok(response)) => Self::status_code(&response) == 111,
            _ => false,
        }
    }

    fn status_code(response: &str) -> u16 {
        response
            .split_whitespace()
            .next()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0)
    }

    /// Drain and discard a body (used to resynchronize after a refused
    /// article while keeping the connection reusable).
    pub async fn drain_body(&mut self) -> Result<(), ArticleError> {
        loop {
            match self.read_body_line().await? {
                BodyLine::End => return Ok(()),
                BodyLine::Data { .. } => {}
            }
        }
    }

    /// Construct a connection from an already-established duplex stream.
    #[cfg(test)]
    pub(crate) fn from_stream<S>(stream: S, read_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(Box::new(read_half)),
            writer: Box::new(write_half),
            current_group: None,
            last_response: None,
            cancel: CancellationToken::new(),
            read_timeout,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn status_classification_follows_the_protocol_table() {
        assert_eq!(classify_status(220), ResponseClass::Success);
        assert_eq!(classify_status(281), ResponseClass::Success);
        assert_eq!(classify_status(400), ResponseClass::Transient);
        assert_eq!(classify_status(499), ResponseClass::Transient);
        assert_eq!(classify_status(411), ResponseClass::NotFound);
        assert_eq!(classify_status(412), ResponseClass::NotFound);
        assert_eq!(classify_status(423), ResponseClass::NotFound);
        assert_eq!(classify_status(430), ResponseClass::NotFound);
        assert_eq!(classify_status(480), ResponseClass::AuthError);
        assert_eq!(
            classify_status(441),
            ResponseClass::Failed,
            "unlisted 4xx codes are plain failures, not retries"
        );
    }

    #[tokio::test]
    async fn body_lines_are_unstuffed_and_terminated() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = NntpConnection::from_stream(client, Duration::from_secs(5));

        let (mut server_read, mut server_write) = tokio::io::split(server);
        tokio::spawn(async move {
            // keep the read half alive so writes do not error
            let mut scratch = [0u8; 64];
            server_write
                .write_all(b"..leading dot\r\nplain line\r\n.\r\n")
                .await
                .unwrap();
            let _ = server_read.read(&mut scratch).await;
        });

        match conn.read_body_line().await.unwrap() {
            BodyLine::Data { line, raw_len } => {
                assert_eq!(line, b".leading dot".to_vec(), "one dot must be stripped");
                assert_eq!(raw_len, b"..leading dot\r\n".len());
            }
            other => panic!("expected data line, got {other:?}"),
        }
        match conn.read_body_line().await.unwrap() {
            BodyLine::Data { line, .. } => assert_eq!(line, b"plain line".to_vec()),
            other => panic!("expected data line, got {other:?}"),
        }
        assert_eq!(conn.read_body_line().await.unwrap(), BodyLine::End);
    }

    #[tokio::test]
    async fn eof_mid_body_is_incomplete() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = NntpConnection::from_stream(client, Duration::from_secs(5));

        let (_server_read, mut server_write) = tokio::io::split(server);
        server_write.write_all(b"partial\r\n").await.unwrap();
        drop(server_write);
        drop(_server_read);

        match conn.read_body_line().await.unwrap() {
            BodyLine::Data { line, .. } => assert_eq!(line, b"partial".to_vec()),
            other => panic!("expected data, got {other:?}"),
        }
        let err = conn.read_body_line().await.unwrap_err();
        assert!(
            matches!(err, ArticleError::Incomplete(_)),
            "EOF before the dot line must be Incomplete, got {err:?}"
        );
    }

    #[tokio::test]
    async fn cancel_unblocks_a_pending_read() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = NntpConnection::from_stream(client, Duration::from_secs(60));
        let token = conn.cancel_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = conn.read_body_line().await.unwrap_err();
        assert_eq!(err, ArticleError::Cancelled);
        drop(server);
    }
}
