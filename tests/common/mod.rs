//! In-process mock NNTP server for end-to-end tests.
//!
//! Each article's responses are scripted: a queue of behaviors per
//! message-id, the last one repeating. This makes fault injection (430s,
//! corrupted bodies, level failover) deterministic.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// One scripted response for an ARTICLE request.
#[derive(Clone)]
pub enum Scripted {
    /// 220 + headers + the given body lines (raw bytes) + terminating dot
    Lines(Vec<Vec<u8>>),
    /// 430 no such article
    NotFound,
}

type ArticleScripts = Arc<Mutex<HashMap<String, Vec<Scripted>>>>;

/// A scripted NNTP server bound to an ephemeral local port.
pub struct MockNntpServer {
    /// Address to point a `ServerConfig` at
    pub addr: SocketAddr,
    articles: ArticleScripts,
}

impl MockNntpServer {
    /// Start the server with scripted articles (message-id without angle
    /// brackets → response queue; the last response repeats).
    pub async fn start(articles: HashMap<String, Vec<Scripted>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        let articles: ArticleScripts = Arc::new(Mutex::new(articles));

        let scripts = articles.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let scripts = scripts.clone();
                tokio::spawn(async move {
                    let _ = handle_client(stream, scripts).await;
                });
            }
        });

        Self { addr, articles }
    }

    /// Replace the script for one article.
    #[allow(dead_code)]
    pub async fn set_article(&self, message_id: &str, script: Vec<Scripted>) {
        self.articles
            .lock()
            .await
            .insert(message_id.to_string(), script);
    }
}

async fn handle_client(stream: tokio::net::TcpStream, scripts: ArticleScripts) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"200 mock news server ready\r\n").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end();
        let upper = command.to_ascii_uppercase();

        if upper.starts_with("AUTHINFO USER") {
            write_half.write_all(b"381 password required\r\n").await?;
        } else if upper.starts_with("AUTHINFO PASS") {
            write_half.write_all(b"281 authentication accepted\r\n").await?;
        } else if upper.starts_with("GROUP ") {
            let group = command.split_whitespace().nth(1).unwrap_or("unknown");
            write_half
                .write_all(format!("211 10 1 10 {group}\r\n").as_bytes())
                .await?;
        } else if upper.starts_with("DATE") {
            write_half.write_all(b"111 20250201103000\r\n").await?;
        } else if upper.starts_with("QUIT") {
            write_half.write_all(b"205 bye\r\n").await?;
            return Ok(());
        } else if upper.starts_with("ARTICLE ") {
            let mid = command
                .split_whitespace()
                .nth(1)
                .unwrap_or("")
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string();
            let script = {
                let mut scripts = scripts.lock().await;
                match scripts.get_mut(&mid) {
                    Some(queue) if queue.len() > 1 => Some(queue.remove(0)),
                    Some(queue) => queue.first().cloned(),
                    None => None,
                }
            };
            match script {
                Some(Scripted::Lines(body)) => {
                    write_half
                        .write_all(format!("220 0 <{mid}> article follows\r\n").as_bytes())
                        .await?;
                    write_half
                        .write_all(format!("Message-ID: <{mid}>\r\n").as_bytes())
                        .await?;
                    write_half.write_all(b"\r\n").await?;
                    for body_line in &body {
                        // dot-stuff lines starting with a dot
                        if body_line.first() == Some(&b'.') {
                            write_half.write_all(b".").await?;
                        }
                        write_half.write_all(body_line).await?;
                        write_half.write_all(b"\r\n").await?;
                    }
                    write_half.write_all(b".\r\n").await?;
                }
                Some(Scripted::NotFound) | None => {
                    write_half.write_all(b"430 no such article\r\n").await?;
                }
            }
        } else {
            write_half.write_all(b"500 command not recognized\r\n").await?;
        }
    }
}

/// Build the yEnc body lines for one part of a file.
pub fn yenc_part(
    payload: &[u8],
    filename: &str,
    total_size: u64,
    part_number: u32,
    begin: u64,
) -> Vec<Vec<u8>> {
    usenet_engine::yenc::encode(payload, filename, total_size, Some((part_number, begin)), 128)
}

/// A standard three-part 250-byte test file (100/100/50).
#[allow(dead_code)]
pub fn three_part_payload() -> Vec<u8> {
    (0..250u32).map(|i| (i % 251) as u8).collect()
}

/// Script all three parts of [`three_part_payload`] under the given ids.
#[allow(dead_code)]
pub fn three_part_scripts(filename: &str, mids: [&str; 3]) -> HashMap<String, Vec<Scripted>> {
    let payload = three_part_payload();
    let mut map = HashMap::new();
    map.insert(
        mids[0].to_string(),
        vec![Scripted::Lines(yenc_part(&payload[0..100], filename, 250, 1, 1))],
    );
    map.insert(
        mids[1].to_string(),
        vec![Scripted::Lines(yenc_part(&payload[100..200], filename, 250, 2, 101))],
    );
    map.insert(
        mids[2].to_string(),
        vec![Scripted::Lines(yenc_part(&payload[200..250], filename, 250, 3, 201))],
    );
    map
}

/// NZB document describing the standard three-part file.
#[allow(dead_code)]
pub fn three_part_nzb(filename: &str, mids: [&str; 3]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
  <file poster="tester" date="1706000000" subject="test [1/1] - &quot;{filename}&quot; yEnc (1/3)">
    <groups><group>alt.binaries.test</group></groups>
    <segments>
      <segment bytes="100" number="1">{}</segment>
      <segment bytes="100" number="2">{}</segment>
      <segment bytes="50" number="3">{}</segment>
    </segments>
  </file>
</nzb>"#,
        mids[0], mids[1], mids[2]
    )
}

/// Engine configuration pointing at mock servers.
#[allow(dead_code)]
pub fn engine_config(
    servers: &[(SocketAddr, u32, u32)], // (addr, level, max_connections)
    base_dir: &std::path::Path,
) -> usenet_engine::Config {
    let mut config = usenet_engine::Config::default();
    config.servers = servers
        .iter()
        .enumerate()
        .map(|(i, (addr, level, max_connections))| usenet_engine::ServerConfig {
            id: i as u32 + 1,
            host: addr.ip().to_string(),
            port: addr.port(),
            tls: false,
            username: Some("test".to_string()),
            password: Some("test".to_string()),
            max_connections: *max_connections,
            level: *level,
            active: true,
            group_pattern: None,
        })
        .collect();
    config.download.dest_dir = base_dir.join("dst");
    config.download.temp_dir = base_dir.join("tmp");
    config.download.nzb_dir = base_dir.join("nzb");
    config.download.retry_interval = std::time::Duration::from_millis(50);
    config.download.connection_timeout = std::time::Duration::from_secs(10);
    config.download.terminate_timeout = std::time::Duration::from_secs(20);
    config
}

/// Wait for a matching event with a timeout, panicking on expiry.
#[allow(dead_code)]
pub async fn wait_for_event<F>(
    events: &mut tokio::sync::broadcast::Receiver<usenet_engine::Event>,
    timeout: std::time::Duration,
    mut predicate: F,
) -> usenet_engine::Event
where
    F: FnMut(&usenet_engine::Event) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for event");
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) => {
                if predicate(&event) {
                    return event;
                }
            }
            Ok(Err(e)) => panic!("event channel closed: {e}"),
            Err(_) => panic!("timed out waiting for event"),
        }
    }
}
