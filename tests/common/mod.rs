//! Scripted executor standing in for the remote router
//!
//! Records every command it is handed and answers from an ordered rule list;
//! anything unmatched succeeds with empty output.

use async_trait::async_trait;
use librouterctl::error::{RouterError, RouterResult};
use librouterctl::remote::{CmdResult, RemoteExecutor};
use std::sync::Mutex;
use std::time::Duration;

type Responder = Box<dyn FnMut(&str) -> CmdResult + Send>;

pub fn ok(stdout: &str) -> CmdResult {
    CmdResult {
        exit_status: 0,
        stdout: stdout.to_string(),
    }
}

pub fn fail() -> CmdResult {
    CmdResult {
        exit_status: 1,
        stdout: String::new(),
    }
}

pub struct FakeExecutor {
    commands: Mutex<Vec<String>>,
    rules: Mutex<Vec<(String, Responder)>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
        }
    }

    /// Install a responder for commands containing |needle|; first match wins
    pub fn rule(self, needle: &str, f: impl FnMut(&str) -> CmdResult + Send + 'static) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), Box::new(f)));
        self
    }

    /// Install a constant response for commands containing |needle|
    pub fn respond(self, needle: &str, result: CmdResult) -> Self {
        self.rule(needle, move |_| result.clone())
    }

    /// Rules for an AP whose log confirms startup on the first poll
    pub fn ap_starts_clean(self) -> Self {
        self.rule(".pid", |cmd| {
            if cmd.starts_with("cat") {
                ok("4242")
            } else {
                ok("")
            }
        })
        .respond("Completing interface initialization", ok(""))
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    /// Position of the first recorded command containing |needle|
    pub fn index_of(&self, needle: &str) -> Option<usize> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .position(|c| c.contains(needle))
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn run(
        &self,
        command: &str,
        _timeout: Duration,
        ignore_status: bool,
    ) -> RouterResult<CmdResult> {
        self.commands.lock().unwrap().push(command.to_string());

        let mut rules = self.rules.lock().unwrap();
        for (needle, responder) in rules.iter_mut() {
            if command.contains(needle.as_str()) {
                let result = responder(command);
                if !ignore_status && result.exit_status != 0 {
                    return Err(RouterError::CommandFailed {
                        cmd: command.to_string(),
                        code: Some(result.exit_status),
                        stderr: String::new(),
                    });
                }
                return Ok(result);
            }
        }

        Ok(ok(""))
    }
}
