//! Test doubles shared by the unit tests.

use core::cell::RefCell;
use core::time::Duration;
use std::collections::VecDeque;

use embedded_hal::delay::DelayNs;

use crate::at::port::{Body, Echo, EchoStatus};
use crate::at::AtPort;

/// Canned answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: EchoStatus,
    pub body: String,
}

impl Reply {
    pub fn ok() -> Self {
        Self::ok_with("")
    }

    pub fn ok_with(body: &str) -> Self {
        Self {
            status: EchoStatus::Ok,
            body: body.to_owned(),
        }
    }

    pub fn expect() -> Self {
        Self {
            status: EchoStatus::Expect,
            body: String::new(),
        }
    }

    pub fn fail() -> Self {
        Self {
            status: EchoStatus::Fail,
            body: String::new(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: EchoStatus::Timeout,
            body: String::new(),
        }
    }
}

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Exec(String),
    Until(String, String),
    Raw(Vec<u8>, String),
}

struct Rule {
    prefix: String,
    /// Replies consumed front to back; the last one sticks.
    replies: VecDeque<Reply>,
    hook: Option<Box<dyn Fn()>>,
}

/// Rule key matching payload written by `raw_send_until`.
pub const RAW: &str = "<raw>";

/// Scripted [`AtPort`]: replies are chosen by command prefix, the newest
/// matching rule wins, and unmatched commands time out.
#[derive(Default)]
pub struct ScriptedAt {
    rules: RefCell<Vec<Rule>>,
    log: RefCell<Vec<Call>>,
}

impl ScriptedAt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `reply`.
    pub fn on(&self, prefix: &str, reply: Reply) {
        self.on_seq(prefix, [reply]);
    }

    /// Answer successive matching commands with `replies` in order.
    pub fn on_seq(&self, prefix: &str, replies: impl IntoIterator<Item = Reply>) {
        self.rules.borrow_mut().push(Rule {
            prefix: prefix.to_owned(),
            replies: replies.into_iter().collect(),
            hook: None,
        });
    }

    /// Run `hook` whenever a command matching `prefix` is issued, before
    /// its reply is returned.  Keeps the current reply for `prefix`.
    pub fn hook(&self, prefix: &str, hook: impl Fn() + 'static) {
        let reply = self.reply_for(prefix);
        self.rules.borrow_mut().push(Rule {
            prefix: prefix.to_owned(),
            replies: VecDeque::from([reply]),
            hook: Some(Box::new(hook)),
        });
    }

    /// Current reply for a command text, without consuming it.
    pub fn reply_for(&self, cmd: &str) -> Reply {
        self.rules
            .borrow()
            .iter()
            .rev()
            .find(|r| cmd.starts_with(&r.prefix))
            .and_then(|r| r.replies.front().cloned())
            .unwrap_or_else(Reply::timeout)
    }

    fn answer(&self, key: &str) -> Reply {
        let (reply, hook_index) = {
            let mut rules = self.rules.borrow_mut();
            let Some(i) = rules.iter().rposition(|r| key.starts_with(&r.prefix)) else {
                return Reply::timeout();
            };
            let rule = &mut rules[i];
            let reply = if rule.replies.len() > 1 {
                rule.replies.pop_front()
            } else {
                rule.replies.front().cloned()
            };
            (
                reply.unwrap_or_else(Reply::timeout),
                rule.hook.is_some().then_some(i),
            )
        };
        if let Some(i) = hook_index {
            // Hooks may add rules, so run them without the borrow.
            let hook = self.rules.borrow_mut()[i].hook.take();
            if let Some(hook) = hook {
                hook();
                self.rules.borrow_mut()[i].hook = Some(hook);
            }
        }
        reply
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    /// Command texts of `exec` and `exec_until` calls, without `\r\n`.
    pub fn commands(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Exec(cmd) | Call::Until(cmd, _) => Some(cmd.trim_end().to_owned()),
                _ => None,
            })
            .collect()
    }

    /// Number of commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Payloads written through `raw_send_until`.
    pub fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.log
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Raw(data, _) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }
}

impl AtPort for ScriptedAt {
    fn exec(&self, _timeout: Duration, cmd: &str) -> Echo {
        self.log.borrow_mut().push(Call::Exec(cmd.to_owned()));
        let reply = self.answer(cmd);
        let mut body = Body::new();
        let _ = body.push_str(&reply.body);
        Echo {
            status: reply.status,
            body,
        }
    }

    fn exec_until(&self, _timeout: Duration, cmd: &str, expect: &str) -> EchoStatus {
        self.log
            .borrow_mut()
            .push(Call::Until(cmd.to_owned(), expect.to_owned()));
        self.answer(cmd).status
    }

    fn raw_send_until(&self, _timeout: Duration, data: &[u8], expect: &str) -> EchoStatus {
        self.log
            .borrow_mut()
            .push(Call::Raw(data.to_vec(), expect.to_owned()));
        self.answer(RAW).status
    }
}

/// `DelayNs` that records requested sleeps instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub slept_ms: Vec<u32>,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.slept_ms.push(ns.div_ceil(1_000_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.slept_ms.push(ms);
    }
}
