//! Scripted in-process shell used by the integration tests
//!
//! `FakeShell` behaves like a PTY running bash closely enough for the
//! handshake, the completion marker and the user switch: it echoes input
//! until `stty -echo`, prints a prompt after every line, honours Ctrl-C
//! during `sleep` and keeps state (cwd, exports, user) across commands.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use ssh_shell_mcp::error::{Result, ShellError};
use ssh_shell_mcp::ssh::{Connector, ShellTimings, ShellTransport, SshConfig, TransferHandle};

pub const HOST: &str = "fakehost";
pub const LOGIN_USER: &str = "alice";
pub const PASSWORD: &str = "alice-pw";

/// Short delays so tests run in milliseconds
pub fn fast_timings() -> ShellTimings {
    ShellTimings {
        settle_delay: Duration::from_millis(20),
        poll_interval: Duration::from_millis(10),
        probe_interval: Duration::from_secs(5),
        probe_timeout: Duration::from_millis(500),
        busy_wait: Duration::from_secs(5),
        progress_interval: Duration::from_millis(50),
        switch_wait: Duration::from_millis(300),
        archive_tail_lines: 30,
    }
}

pub fn login_config() -> SshConfig {
    SshConfig::new(HOST, LOGIN_USER).with_password(PASSWORD)
}

/// Remote filesystem shared by every connection to the fake host
pub type Files = Arc<Mutex<BTreeSet<String>>>;

#[derive(Debug)]
struct Inner {
    output: String,
    pending_line: String,
    echo: bool,
    user: String,
    awaiting_password: Option<String>,
    last_status: i32,
    cwd: String,
    env: HashMap<String, String>,
    alive: bool,
    hung: bool,
    busy: bool,
    overlaps: usize,
    history: Vec<String>,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    interrupt: Notify,
    files: Files,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

enum Flow {
    Done,
    Interrupted,
    AwaitingPassword,
}

/// One fake interactive shell
#[derive(Debug)]
pub struct FakeShell {
    shared: Arc<Shared>,
    lines: mpsc::UnboundedSender<String>,
}

impl FakeShell {
    pub fn spawn(files: Files) -> Arc<Self> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                output: String::new(),
                pending_line: String::new(),
                echo: true,
                user: LOGIN_USER.to_string(),
                awaiting_password: None,
                last_status: 0,
                cwd: format!("/home/{}", LOGIN_USER),
                env: HashMap::new(),
                alive: true,
                hung: false,
                busy: false,
                overlaps: 0,
                history: Vec::new(),
            }),
            interrupt: Notify::new(),
            files,
        });

        {
            let mut inner = shared.lock();
            inner.output.push_str("Last login: Sun Oct 18 09:00:00 2026 from 10.0.0.1\r\n");
            let prompt = prompt(&inner.user);
            inner.output.push_str(&prompt);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let worker = shared.clone();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                process_line(&worker, line).await;
            }
        });

        Arc::new(Self { shared, lines: tx })
    }

    /// Drop the connection without telling anyone
    pub fn kill(&self) {
        self.shared.lock().alive = false;
        self.shared.interrupt.notify_waiters();
    }

    /// Keep the connection open but stop reacting to input
    pub fn hang(&self) {
        self.shared.lock().hung = true;
    }

    /// Lines written while a previous line was still being processed
    pub fn overlaps(&self) -> usize {
        self.shared.lock().overlaps
    }

    /// Every complete line the shell received
    pub fn history(&self) -> Vec<String> {
        self.shared.lock().history.clone()
    }

    pub fn user(&self) -> String {
        self.shared.lock().user.clone()
    }
}

#[async_trait]
impl ShellTransport for FakeShell {
    async fn write(&self, data: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(data).to_string();
        let mut inner = self.shared.lock();
        if !inner.alive {
            return Err(ShellError::channel("fake shell is closed"));
        }
        if inner.hung {
            return Ok(());
        }

        for ch in text.chars() {
            match ch {
                '\x03' => self.shared.interrupt.notify_waiters(),
                '\x1a' => {}
                '\n' => {
                    let line = std::mem::take(&mut inner.pending_line);
                    if inner.busy {
                        inner.overlaps += 1;
                    }
                    inner.busy = true;
                    inner.history.push(line.clone());
                    let _ = self.lines.send(line);
                }
                c => inner.pending_line.push(c),
            }
        }
        Ok(())
    }

    fn read_available(&self) -> String {
        std::mem::take(&mut self.shared.lock().output)
    }

    fn clear_output(&self) {
        self.shared.lock().output.clear();
    }

    fn is_alive(&self) -> bool {
        self.shared.lock().alive
    }

    async fn open_transfer(&self) -> Result<TransferHandle> {
        Err(ShellError::transfer("fake shell has no sftp subsystem"))
    }

    async fn disconnect(&self) {
        self.kill();
    }
}

/// Connector handing out fake shells; counts connections
pub struct FakeConnector {
    files: Files,
    shells: Mutex<Vec<Arc<FakeShell>>>,
    connects: AtomicUsize,
    refuse: bool,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            files: Arc::new(Mutex::new(BTreeSet::new())),
            shells: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            refuse: false,
        })
    }

    /// Connector whose host is unreachable
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            files: Arc::new(Mutex::new(BTreeSet::new())),
            shells: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            refuse: true,
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_shell(&self) -> Arc<FakeShell> {
        self.shells.lock().unwrap().last().cloned().unwrap()
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains(path)
    }

    pub fn add_file(&self, path: &str) {
        self.files.lock().unwrap().insert(path.to_string());
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn ShellTransport>> {
        if self.refuse {
            return Err(ShellError::connection(format!(
                "Failed to connect to {}:{}: connection refused",
                config.host, config.port
            )));
        }
        if config.password.as_deref() != Some(PASSWORD) {
            return Err(ShellError::auth(format!(
                "Password authentication failed for user {}",
                config.username
            )));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        let shell = FakeShell::spawn(self.files.clone());
        self.shells.lock().unwrap().push(shell.clone());
        Ok(shell)
    }
}

fn prompt(user: &str) -> String {
    format!("{}@{}:~$ ", user, HOST)
}

async fn process_line(shared: &Shared, line: String) {
    {
        let mut inner = shared.lock();
        if !inner.alive {
            return;
        }

        if let Some(target) = inner.awaiting_password.take() {
            if line == PASSWORD {
                inner.user = target;
            } else {
                inner
                    .output
                    .push_str("\r\nSorry, try again.\r\nsu: Authentication failure\r\n");
            }
            inner.output.push_str("\r\n");
            let prompt = prompt(&inner.user);
            inner.output.push_str(&prompt);
            inner.busy = false;
            return;
        }

        if inner.echo {
            inner.output.push_str(&line);
            inner.output.push_str("\r\n");
        }
    }

    let flow = run_list(shared, &line).await;

    let mut inner = shared.lock();
    if !inner.alive {
        return;
    }
    match flow {
        Flow::Done => {
            let prompt = prompt(&inner.user);
            inner.output.push_str(&prompt);
        }
        Flow::Interrupted => {
            inner.output.push_str("^C\r\n");
            let prompt = prompt(&inner.user);
            inner.output.push_str(&prompt);
        }
        Flow::AwaitingPassword => {}
    }
    inner.busy = false;
}

/// `a; b && c | d`
async fn run_list(shared: &Shared, line: &str) -> Flow {
    for segment in split_unquoted(line, ";") {
        if segment.trim().is_empty() {
            continue;
        }
        for part in split_unquoted(&segment, "&&") {
            let status = shared.lock().last_status;
            let part = part.replace("$?", &status.to_string());
            match run_pipeline(shared, &part).await {
                Ok(0) => {}
                Ok(_) => break,
                Err(flow) => return flow,
            }
        }
    }
    Flow::Done
}

async fn run_pipeline(shared: &Shared, part: &str) -> std::result::Result<i32, Flow> {
    let mut stdin = None;
    let stages = split_unquoted(part, "|");
    let last = stages.len().saturating_sub(1);
    for (index, stage) in stages.iter().enumerate() {
        let words = tokenize(stage);
        let (output, status) = run_command(shared, &words, stdin.take()).await?;
        shared.lock().last_status = status;
        if index == last {
            shared.lock().output.push_str(&output);
            return Ok(status);
        }
        stdin = Some(output);
    }
    Ok(0)
}

async fn run_command(
    shared: &Shared,
    words: &[String],
    stdin: Option<String>,
) -> std::result::Result<(String, i32), Flow> {
    let Some(program) = words.first() else {
        return Ok((String::new(), 0));
    };

    match program.as_str() {
        "sleep" => {
            let secs: f64 = words.get(1).and_then(|s| s.parse().ok()).unwrap_or(0.0);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => Ok((String::new(), 0)),
                _ = shared.interrupt.notified() => Err(Flow::Interrupted),
            }
        }
        "sudo" if words.get(1).map(String::as_str) == Some("su") => {
            let target = words.last().cloned().unwrap_or_default();
            let mut inner = shared.lock();
            let prompt = format!("[sudo] password for {}: ", inner.user);
            inner.output.push_str(&prompt);
            inner.awaiting_password = Some(target);
            Err(Flow::AwaitingPassword)
        }
        "sudo" => {
            if words.iter().any(|w| w == "-S") {
                let given = stdin.unwrap_or_default();
                if given.trim() != PASSWORD {
                    return Ok(("Sorry, try again.\r\n".to_string(), 1));
                }
            }
            let script = words
                .iter()
                .position(|w| w == "-c")
                .and_then(|i| words.get(i + 1))
                .cloned()
                .unwrap_or_default();
            let mut inner = shared.lock();
            Ok(builtin(&mut inner, &shared.files, &tokenize(&script), "root"))
        }
        _ => {
            let mut inner = shared.lock();
            let user = inner.user.clone();
            Ok(builtin(&mut inner, &shared.files, words, &user))
        }
    }
}

fn builtin(inner: &mut Inner, files: &Files, words: &[String], user: &str) -> (String, i32) {
    let args = &words[1.min(words.len())..];
    let line = |text: &str| format!("{}\r\n", text);

    match words.first().map(String::as_str).unwrap_or("") {
        "" | "set" | "true" => (String::new(), 0),
        "false" => (String::new(), 1),
        "stty" => {
            match args.first().map(String::as_str) {
                Some("-echo") => inner.echo = false,
                Some("echo") => inner.echo = true,
                _ => {}
            }
            (String::new(), 0)
        }
        "echo" => (line(&args.join(" ")), 0),
        "printf" => {
            let Some(format) = args.first() else {
                return (String::new(), 1);
            };
            let mut text = format.clone();
            for arg in &args[1..] {
                text = text.replacen("%s", arg, 1);
            }
            (text.replace("\\n", "\r\n"), 0)
        }
        "exit" => {
            let code = args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
            (String::new(), code)
        }
        "whoami" => (line(user), 0),
        "printenv" => {
            let name = args.first().map(String::as_str).unwrap_or("");
            let value = match name {
                "USER" | "LOGNAME" => Some(user.to_string()),
                "HOME" if user == "root" => Some("/root".to_string()),
                "HOME" => Some(format!("/home/{}", user)),
                other => inner.env.get(other).cloned(),
            };
            match value {
                Some(value) => (line(&value), 0),
                None => (String::new(), 1),
            }
        }
        "export" => {
            for assignment in args {
                if let Some((name, value)) = assignment.split_once('=') {
                    inner.env.insert(name.to_string(), value.to_string());
                }
            }
            (String::new(), 0)
        }
        "cd" => {
            inner.cwd = args.first().cloned().unwrap_or_else(|| "~".to_string());
            (String::new(), 0)
        }
        "pwd" => (line(&inner.cwd), 0),
        "touch" => {
            let mut files = files.lock().unwrap();
            for path in args {
                files.insert(path.clone());
            }
            (String::new(), 0)
        }
        "test" => {
            let exists = args.get(1).is_some_and(|p| files.lock().unwrap().contains(p));
            (String::new(), if exists { 0 } else { 1 })
        }
        "rm" => {
            let mut files = files.lock().unwrap();
            for path in args.iter().filter(|a| !a.starts_with('-')) {
                files.remove(path);
            }
            (String::new(), 0)
        }
        "tar" | "zip" => {
            let listing: String = (0..100).map(|i| line(&format!("data/file{}.txt", i))).collect();
            (listing, 0)
        }
        other => (line(&format!("bash: {}: command not found", other)), 127),
    }
}

/// Split on `sep` outside of quotes
fn split_unquoted(text: &str, sep: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut rest = text;

    while let Some(ch) = rest.chars().next() {
        if quote.is_none() && rest.starts_with(sep) {
            parts.push(std::mem::take(&mut current));
            rest = &rest[sep.len()..];
            continue;
        }
        match (quote, ch) {
            (None, '\'') | (None, '"') => quote = Some(ch),
            (Some(q), c) if q == c => quote = None,
            _ => {}
        }
        current.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    parts.push(current);
    parts
}

/// Shell-style word splitting with single quotes, double quotes and backslash
fn tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(q), c) if q == c => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'') | (None, '"') => {
                quote = Some(ch);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_word = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
