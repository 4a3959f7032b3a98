//! Scripted EC600S on the far end of a serial link.
//!
//! Parses command lines as the agent writes them and answers from a rule
//! table, so a real `AtAgent` and its parser task run unmodified.  An
//! unscripted `AT+QISEND` gets a `>` prompt; the bytes written after it
//! are collected as payload until the announced length has arrived, then
//! `SEND OK` is reported.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use cellmodem::at::SerialPort;
use cellmodem::config::ModemConfig;

type Responder = Box<dyn Fn(&str) -> String + Send>;

struct Rule {
    prefix: String,
    /// Match the whole line rather than a prefix.
    exact: bool,
    respond: Responder,
}

impl Rule {
    fn matches(&self, cmd: &str) -> bool {
        if self.exact {
            cmd == self.prefix
        } else {
            cmd.starts_with(&self.prefix)
        }
    }
}

#[derive(Default)]
struct Wire {
    /// Bytes waiting for the agent to read.
    rx: VecDeque<u8>,
    /// Partial command line.
    line: Vec<u8>,
    /// Payload bytes still owed after a send prompt.
    owed: usize,
    payload: Vec<u8>,
    commands: Vec<String>,
    payloads: Vec<Vec<u8>>,
}

struct Inner {
    wire: Mutex<Wire>,
    readable: Condvar,
    rules: Mutex<Vec<Rule>>,
}

// ── MockModem ─────────────────────────────────────────────────

/// Cloneable handle: one clone goes to the session, the test keeps one.
#[derive(Clone)]
pub struct MockModem {
    inner: Arc<Inner>,
}

#[allow(dead_code)]
impl MockModem {
    /// A modem with no rules; every command goes unanswered.
    pub fn silent() -> Self {
        Self {
            inner: Arc::new(Inner {
                wire: Mutex::new(Wire::default()),
                readable: Condvar::new(),
                rules: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A registered modem that answers bring-up, open, send, close and
    /// DNS like the real part.
    pub fn healthy() -> Self {
        let m = Self::silent();
        m.on_exact("AT", "\r\nOK\r\n");
        m.on("ATE0", "\r\nOK\r\n");
        m.on("AT+CPIN?", "\r\n+CPIN: READY\r\n\r\nOK\r\n");
        m.on("AT+CSQ", "\r\n+CSQ: 24,99\r\n\r\nOK\r\n");
        m.on("AT+CREG?", "\r\n+CREG: 0,1\r\n\r\nOK\r\n");
        m.on("AT+CGREG?", "\r\n+CGREG: 0,1\r\n\r\nOK\r\n");
        m.on("AT+QIDEACT=1", "\r\nOK\r\n");
        m.on("AT+QICSGP=", "\r\nOK\r\n");
        m.on("AT+QIACT=1", "\r\nOK\r\n");
        m.on("AT+QISTATE=", "\r\nOK\r\n");
        m.on("AT+QICLOSE=", "\r\nOK\r\n");
        m.on_with("AT+QIOPEN=", |cmd| {
            format!("\r\nOK\r\n\r\n+QIOPEN: {},0\r\n", field(cmd, 1))
        });
        m.on(
            "AT+QIDNSGIP=",
            "\r\nOK\r\n\r\n+QIURC: \"dnsgip\",0,1,600\r\n\r\n+QIURC: \"dnsgip\",\"93.184.216.34\"\r\n",
        );
        m
    }

    /// Answer commands starting with `prefix` with `reply`.  Newer rules
    /// shadow older ones.
    pub fn on(&self, prefix: &str, reply: &str) {
        let reply = reply.to_owned();
        self.on_with(prefix, move |_| reply.clone());
    }

    /// Answer exactly `cmd` with `reply`.
    pub fn on_exact(&self, cmd: &str, reply: &str) {
        let reply = reply.to_owned();
        self.push_rule(cmd, true, Box::new(move |_| reply.clone()));
    }

    /// Answer commands starting with `prefix` with whatever `respond`
    /// builds from the full command line.
    pub fn on_with(&self, prefix: &str, respond: impl Fn(&str) -> String + Send + 'static) {
        self.push_rule(prefix, false, Box::new(respond));
    }

    fn push_rule(&self, prefix: &str, exact: bool, respond: Responder) {
        self.inner.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_owned(),
            exact,
            respond,
        });
    }

    /// Push unsolicited bytes onto the wire.
    pub fn inject(&self, bytes: &[u8]) {
        let mut wire = self.inner.wire.lock().unwrap();
        wire.rx.extend(bytes);
        self.inner.readable.notify_all();
    }

    /// Command lines received so far, without terminators.
    pub fn commands(&self) -> Vec<String> {
        self.inner.wire.lock().unwrap().commands.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Live handles to this modem, the caller's included.  A session's
    /// parser task holds one until it has been joined.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Payloads received after send prompts.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.inner.wire.lock().unwrap().payloads.clone()
    }

    fn respond(&self, cmd: &str) -> Option<String> {
        let rules = self.inner.rules.lock().unwrap();
        rules
            .iter()
            .rev()
            .find(|r| r.matches(cmd))
            .map(|r| (r.respond)(cmd))
    }

    fn on_command(&self, wire: &mut Wire, cmd: String) {
        if let Some(reply) = self.respond(&cmd) {
            wire.rx.extend(reply.as_bytes());
        } else if let Some(args) = cmd.strip_prefix("AT+QISEND=") {
            // Unscripted sends prompt and take the announced byte count.
            wire.owed = args
                .split(',')
                .nth(1)
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            wire.payload.clear();
            wire.rx.extend(b"\r\n> ");
        }
        wire.commands.push(cmd);
    }
}

/// Comma-separated field `n` of the argument list in `cmd`.
pub fn field(cmd: &str, n: usize) -> &str {
    cmd.split_once('=')
        .map_or("", |(_, args)| args.split(',').nth(n).unwrap_or(""))
}

impl SerialPort for MockModem {
    type Error = core::convert::Infallible;

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error> {
        let deadline = Instant::now() + timeout;
        let mut wire = self.inner.wire.lock().unwrap();
        while wire.rx.is_empty() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(0);
            }
            wire = self.inner.readable.wait_timeout(wire, left).unwrap().0;
        }
        let n = buf.len().min(wire.rx.len());
        for (slot, b) in buf.iter_mut().zip(wire.rx.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }

    fn write_all(&self, data: &[u8]) -> Result<(), Self::Error> {
        let mut wire = self.inner.wire.lock().unwrap();
        for &b in data {
            if wire.owed > 0 {
                wire.payload.push(b);
                wire.owed -= 1;
                if wire.owed == 0 {
                    let payload = std::mem::take(&mut wire.payload);
                    wire.payloads.push(payload);
                    wire.rx.extend(b"\r\nSEND OK\r\n");
                }
                continue;
            }
            wire.line.push(b);
            if wire.line.ends_with(b"\r\n") {
                let cmd = String::from_utf8_lossy(&wire.line[..wire.line.len() - 2]).into_owned();
                wire.line.clear();
                self.on_command(&mut wire, cmd);
            }
        }
        if wire.line == b"+++" {
            wire.line.clear();
            wire.commands.push("+++".to_owned());
            wire.rx.extend(b"\r\nOK\r\n");
        }
        self.inner.readable.notify_all();
        Ok(())
    }
}

/// Timeouts short enough that failure paths finish quickly.
pub fn fast_config() -> ModemConfig {
    ModemConfig {
        stage_retries: 3,
        settle_ms: 10,
        probe_timeout_ms: 200,
        command_timeout_ms: 200,
        apn_timeout_ms: 200,
        open_timeout_ms: 300,
        prompt_timeout_ms: 200,
        send_timeout_ms: 300,
        datagram_send_timeout_ms: 200,
        escape_settle_ms: 100,
        recv_timeout_ms: 200,
        dns_request_timeout_ms: 200,
        resolve_timeout_ms: Some(1000),
        urc_byte_timeout_ms: 200,
        ..ModemConfig::default()
    }
}
