//! In-memory stand-ins shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use nuwani_sdk::channels::ChannelTracker;
use nuwani_sdk::config::{Configuration, Server};
use nuwani_sdk::connection::{BoxedStream, ConnectionError, Dialer, LineWriter};
use nuwani_sdk::irc::Message;
use nuwani_sdk::CommandContext;

/// Hands out pre-arranged streams. `None` entries fail to connect; once the
/// script runs out, dialing never completes.
#[derive(Default)]
pub struct ScriptedDialer {
    script: Mutex<VecDeque<Option<DuplexStream>>>,
    dialed: Mutex<Vec<String>>,
}

impl ScriptedDialer {
    pub fn new(script: Vec<Option<DuplexStream>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            dialed: Mutex::new(Vec::new()),
        })
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }
}

impl Dialer for ScriptedDialer {
    fn dial(&self, server: &Server) -> BoxFuture<'static, io::Result<BoxedStream>> {
        self.dialed.lock().push(server.to_string());
        let next = self.script.lock().pop_front();
        Box::pin(async move {
            match next {
                Some(Some(stream)) => Ok(Box::new(stream) as BoxedStream),
                Some(None) => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
                None => std::future::pending().await,
            }
        })
    }
}

pub fn server(ip: &str) -> Server {
    Server {
        ip: ip.to_string(),
        port: 6667,
    }
}

/// Records every line written through it.
#[derive(Default)]
pub struct SentLines(Mutex<Vec<String>>);

impl SentLines {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl LineWriter for SentLines {
    fn write(&self, line: &str) -> Result<(), ConnectionError> {
        self.0.lock().push(line.to_string());
        Ok(())
    }
}

/// The server side of a duplex stream, line by line.
pub struct FakeServer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// The next line the client sent, without CRLF.
    pub async fn expect_line(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for the client")
            .expect("read failed")
            .expect("client closed the stream")
    }

    pub async fn send(&mut self, lines: &[&str]) {
        use tokio::io::AsyncWriteExt;
        for line in lines {
            self.writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
        }
    }
}

/// A context for `line` as if it arrived with `names` in the echo channel,
/// on a network with `(qaohv)~&@%+` status prefixes.
pub fn context_for(
    writer: Arc<SentLines>,
    config: &Configuration,
    names: &str,
    line: &str,
) -> CommandContext {
    let mut tracker = ChannelTracker::new();
    tracker.set_prefixes("(qaohv)~&@%+").unwrap();
    let me = &config.bot.nickname;
    let join = format!(":{me}!bot@host JOIN {}", config.echo_channel);
    let names = format!(":irc.test 353 {me} = {} :{names}", config.echo_channel);
    for setup in [join, names] {
        tracker.handle_message(me, &Message::parse(&setup).unwrap());
    }
    CommandContext::for_message(writer, &Message::parse(line).unwrap(), config, &tracker).unwrap()
}
