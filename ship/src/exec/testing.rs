//! Test doubles for [`CommandRunner`]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::errors::ShipError;
use crate::exec::{Capture, Cmd, CmdOutput, CommandRunner, FileTransfer};

/// Successful output with the given stdout
pub fn ok(stdout: &str) -> CmdOutput {
    CmdOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Failed output with the given exit code and stderr
pub fn exit(code: i32, stderr: &str) -> CmdOutput {
    CmdOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Handler = Box<dyn Fn(&Cmd) -> CmdOutput + Send + Sync>;

/// Records every command and answers with a handler
pub struct ScriptedRunner {
    handler: Handler,
    programs: Vec<String>,
    commands: Mutex<Vec<Cmd>>,
    copies: Mutex<Vec<(PathBuf, String, u32)>>,
}

impl ScriptedRunner {
    pub fn new(handler: impl Fn(&Cmd) -> CmdOutput + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            programs: Vec::new(),
            commands: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
        }
    }

    /// Every command exits 0 with empty output
    pub fn succeeding() -> Self {
        Self::new(|_| ok(""))
    }

    /// Programs reported as installed by `has_program`
    pub fn with_programs<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.programs = programs.into_iter().map(Into::into).collect();
        self
    }

    pub fn commands(&self) -> Vec<Cmd> {
        lock(&self.commands).clone()
    }

    /// Rendered shell lines of every command, in dispatch order
    pub fn lines(&self) -> Vec<String> {
        lock(&self.commands).iter().map(Cmd::shell_line).collect()
    }

    pub fn copies(&self) -> Vec<(PathBuf, String, u32)> {
        lock(&self.copies).clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, cmd: &Cmd, _capture: Capture) -> Result<CmdOutput, ShipError> {
        lock(&self.commands).push(cmd.clone());
        Ok((self.handler)(cmd))
    }

    async fn has_program(&self, program: &str) -> Result<bool, ShipError> {
        Ok(self.programs.iter().any(|p| p == program))
    }
}

#[async_trait]
impl FileTransfer for ScriptedRunner {
    async fn copy_file(&self, local: &Path, remote: &str, mode: u32) -> Result<(), ShipError> {
        lock(&self.copies).push((local.to_path_buf(), remote.to_string(), mode));
        Ok(())
    }
}

/// One entry of the simulated rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRule {
    pub to: String,
    pub action: String,
    pub direction: String,
    pub v6: bool,
}

impl FakeRule {
    pub fn allow(to: &str) -> Self {
        Self {
            to: to.to_string(),
            action: "ALLOW".to_string(),
            direction: "IN".to_string(),
            v6: false,
        }
    }

    pub fn deny(to: &str) -> Self {
        Self {
            action: "DENY".to_string(),
            ..Self::allow(to)
        }
    }

    pub fn v6(mut self) -> Self {
        self.v6 = true;
        self
    }

    pub fn outbound(mut self) -> Self {
        self.direction = "OUT".to_string();
        self
    }

    fn render(&self, number: usize) -> String {
        let suffix = if self.v6 { " (v6)" } else { "" };
        let action = if self.direction.is_empty() {
            self.action.clone()
        } else {
            format!("{} {}", self.action, self.direction)
        };
        format!(
            "[{:>2}] {:<27}{:<12}Anywhere{}",
            number,
            format!("{}{}", self.to, suffix),
            action,
            suffix
        )
    }
}

#[derive(Debug, Default)]
struct UfwState {
    installed: bool,
    active: bool,
    rules: Vec<FakeRule>,
    allowed_at_enable: Option<Vec<FakeRule>>,
    log: Vec<String>,
}

/// In-memory `ufw` that answers the subcommands the firewall reconciler uses
///
/// Rules are kept the way ufw lists them: every IPv4 rule before every IPv6
/// rule. Numbers are recomputed on every listing, so deletions renumber.
#[derive(Debug, Clone)]
pub struct FakeUfw {
    state: Arc<Mutex<UfwState>>,
}

impl Default for FakeUfw {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeUfw {
    /// Installed and inactive, with no rules
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(UfwState {
                installed: true,
                ..Default::default()
            })),
        }
    }

    pub fn not_installed() -> Self {
        let fake = Self::new();
        lock(&fake.state).installed = false;
        fake
    }

    pub fn active(self) -> Self {
        lock(&self.state).active = true;
        self
    }

    /// Append a rule verbatim at the end of the listing
    pub fn with_rule(self, rule: FakeRule) -> Self {
        lock(&self.state).rules.push(rule);
        self
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    pub fn rules(&self) -> Vec<FakeRule> {
        lock(&self.state).rules.clone()
    }

    /// Allow rules that existed when the firewall was enabled
    pub fn allowed_at_enable(&self) -> Option<Vec<FakeRule>> {
        lock(&self.state).allowed_at_enable.clone()
    }

    /// Number of rules matching `to` and family
    pub fn count(&self, to: &str, v6: bool) -> usize {
        lock(&self.state)
            .rules
            .iter()
            .filter(|r| r.to == to && r.v6 == v6 && r.action == "ALLOW")
            .count()
    }

    /// Every `ufw` invocation, rendered
    pub fn log(&self) -> Vec<String> {
        lock(&self.state).log.clone()
    }

    pub fn clear_log(&self) {
        lock(&self.state).log.clear();
    }

    /// Mutating invocations (`allow`, `delete`, `enable`)
    pub fn mutations(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|line| !line.starts_with("ufw status"))
            .collect()
    }

    fn numbered(state: &UfwState) -> String {
        if !state.active {
            return "Status: inactive\n".to_string();
        }
        let mut out = String::from(
            "Status: active\n\n     To                         Action      From\n     --                         ------      ----\n",
        );
        for (i, rule) in state.rules.iter().enumerate() {
            out.push_str(&rule.render(i + 1));
            out.push('\n');
        }
        out.push('\n');
        out
    }

    fn verbose(state: &UfwState) -> String {
        if !state.active {
            return "Status: inactive\n".to_string();
        }
        let mut out = String::from(
            "Status: active\nLogging: on (low)\nDefault: deny (incoming), allow (outgoing), disabled (routed)\nNew profiles: skip\n\nTo                         Action      From\n--                         ------      ----\n",
        );
        for rule in &state.rules {
            let line = rule.render(0);
            out.push_str(line.splitn(2, "] ").nth(1).unwrap_or_default());
            out.push('\n');
        }
        out
    }

    fn allow(state: &mut UfwState, to: &str) {
        if !state.rules.iter().any(|r| r.to == to && !r.v6 && r.action == "ALLOW") {
            let first_v6 = state
                .rules
                .iter()
                .position(|r| r.v6)
                .unwrap_or(state.rules.len());
            state.rules.insert(first_v6, FakeRule::allow(to));
        }
        if !state.rules.iter().any(|r| r.to == to && r.v6 && r.action == "ALLOW") {
            state.rules.push(FakeRule::allow(to).v6());
        }
    }

    fn handle(state: &mut UfwState, args: &[&str]) -> CmdOutput {
        match args {
            ["status"] => ok(if state.active {
                "Status: active\n"
            } else {
                "Status: inactive\n"
            }),
            ["status", "numbered"] => ok(&Self::numbered(state)),
            ["status", "verbose"] => ok(&Self::verbose(state)),
            ["allow", to] => {
                Self::allow(state, to);
                ok("Rule added\nRule added (v6)\n")
            }
            ["--force", "enable"] => {
                state.active = true;
                state.allowed_at_enable = Some(
                    state
                        .rules
                        .iter()
                        .filter(|r| r.action == "ALLOW")
                        .cloned()
                        .collect(),
                );
                ok("Firewall is active and enabled on system startup\n")
            }
            ["--force", "delete", number] => match number.parse::<usize>() {
                Ok(n) if n >= 1 && n <= state.rules.len() => {
                    state.rules.remove(n - 1);
                    ok("Rule deleted\n")
                }
                _ => exit(1, "ERROR: Could not find rule\n"),
            },
            _ => exit(1, "ERROR: Invalid syntax\n"),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeUfw {
    async fn execute(&self, cmd: &Cmd, _capture: Capture) -> Result<CmdOutput, ShipError> {
        let mut state = lock(&self.state);
        if cmd.program != "ufw" {
            return Ok(ok(""));
        }
        if !state.installed {
            return Err(ShipError::ToolMissingError("ufw".to_string()));
        }
        state.log.push(cmd.shell_line());
        let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
        Ok(Self::handle(&mut state, &args))
    }

    async fn has_program(&self, program: &str) -> Result<bool, ShipError> {
        Ok(program != "ufw" || lock(&self.state).installed)
    }
}
