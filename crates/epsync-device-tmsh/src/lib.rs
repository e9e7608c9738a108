// # tmsh Device Client
//
// This crate drives the device through its traffic management shell.
//
// ## Command Model
//
// Every operation is exactly one `tmsh` invocation, built as an argument
// vector and executed without a shell, so object names and paths are never
// re-parsed. Argument construction is kept in pure functions so the exact
// command lines can be unit tested without a device.
//
// | Operation                 | Command                                               |
// |---------------------------|-------------------------------------------------------|
// | failover status           | `show /cm failover-status field-fmt`                  |
// | query data-group file     | `list sys file data-group <name>`                     |
// | query external data-group | `list ltm data-group external <name>`                 |
// | query URL category        | `list sys url-db url-category <name>`                 |
// | create/modify ...         | `create`/`modify` on the same paths                   |
// | save                      | `save sys config`                                     |
// | sync                      | `run cm config-sync to-group <group>`                 |
//
// ## Single-shot
//
// No retries and no caching. A command that reports "was not found" is an
// absent object, not a failure.
//
// ## Dry-Run Mode
//
// Read-only commands (`list`, `show`) run normally. Mutating commands are
// logged and reported as successful without being executed.

use async_trait::async_trait;
use epsync_core::classify::{MatchType, UrlRule};
use epsync_core::traits::{
    DeviceClient, ObjectKind, ObjectParams, ObjectState, RuleMode, ValueType,
};
use epsync_core::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default shell binary
const DEFAULT_PROGRAM: &str = "tmsh";

/// Default time allowed for a single command
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Output fragment of a lookup for a missing object
const NOT_FOUND_MARKER: &str = "was not found";

/// tmsh-backed device client
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the client will:
/// - Run failover status and existence queries
/// - Log every create, modify, save and sync command
/// - **NOT** execute them
#[derive(Debug, Clone)]
pub struct TmshDevice {
    /// Binary to execute
    program: PathBuf,

    /// Arguments placed before every command
    leading_args: Vec<String>,

    /// Time allowed for one command
    timeout: Duration,

    /// Dry-run mode: if true, run queries but skip mutations
    dry_run: bool,
}

impl TmshDevice {
    /// Create a new tmsh device client
    ///
    /// # Parameters
    ///
    /// - `dry_run`: If true, run queries but only log mutating commands
    pub fn new(dry_run: bool) -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            leading_args: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            dry_run,
        }
    }

    /// Create a client that executes every command
    pub fn new_live() -> Self {
        Self::new(false)
    }

    /// Create a client that only logs mutating commands
    pub fn new_dry_run() -> Self {
        Self::new(true)
    }

    /// Run a different binary, with `leading_args` before every command
    pub fn with_program(mut self, program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute one command, returning its output
    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        let line = render_command(args);
        tracing::debug!("Running tmsh {}", line);

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::device_cli(
                    args.first().cloned().unwrap_or_default(),
                    object_of(args),
                    format!("failed to execute {}: {}", self.program.display(), e),
                ));
            }
            Err(_) => {
                return Err(Error::device_cli(
                    args.first().cloned().unwrap_or_default(),
                    object_of(args),
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Execute a mutating command, honouring dry-run
    async fn mutate(&self, operation: &str, args: Vec<String>) -> Result<()> {
        if self.dry_run {
            tracing::info!("DRY-RUN: would run tmsh {}", render_command(&args));
            return Ok(());
        }

        let output = self.run(&args).await?;
        if !output.success {
            return Err(Error::device_cli(operation, object_of(&args), output.failure_detail()));
        }
        tracing::debug!("tmsh {} succeeded", render_command(&args));
        Ok(())
    }
}

impl Default for TmshDevice {
    fn default() -> Self {
        Self::new_live()
    }
}

#[async_trait]
impl DeviceClient for TmshDevice {
    async fn failover_status(&self) -> Result<String> {
        let args = failover_status_args();
        let output = self.run(&args).await?;
        if !output.success {
            return Err(Error::device_cli("show", "failover-status", output.failure_detail()));
        }
        Ok(output.stdout)
    }

    async fn query(&self, kind: ObjectKind, name: &str) -> Result<ObjectState> {
        let args = query_args(kind, name);
        let output = self.run(&args).await?;

        if output.stdout.contains(NOT_FOUND_MARKER) || output.stderr.contains(NOT_FOUND_MARKER) {
            tracing::debug!("{} {} not found", kind, name);
            return Ok(ObjectState::absent(output.combined()));
        }
        if !output.success {
            return Err(Error::device_cli("query", format!("{kind} {name}"), output.failure_detail()));
        }
        Ok(ObjectState::present(output.stdout))
    }

    async fn create(&self, kind: ObjectKind, name: &str, params: &ObjectParams) -> Result<()> {
        let args = create_args(kind, name, params)?;
        self.mutate("create", args).await
    }

    async fn modify(&self, kind: ObjectKind, name: &str, params: &ObjectParams) -> Result<()> {
        let args = modify_args(kind, name, params)?;
        self.mutate("modify", args).await
    }

    async fn save_config(&self) -> Result<()> {
        self.mutate("save", save_config_args()).await
    }

    async fn sync_group(&self, group: &str) -> Result<()> {
        self.mutate("sync", sync_group_args(group)).await
    }

    fn device_name(&self) -> &'static str {
        "tmsh"
    }
}

/// Captured result of one command
#[derive(Debug)]
struct CommandOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }

    fn failure_detail(&self) -> String {
        let text = self.combined();
        match (self.code, text.is_empty()) {
            (Some(code), true) => format!("exit status {code}"),
            (Some(code), false) => format!("exit status {code}: {text}"),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {text}"),
        }
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Configuration path of an object kind
fn object_path(kind: ObjectKind) -> [&'static str; 3] {
    match kind {
        ObjectKind::DataGroupFile => ["sys", "file", "data-group"],
        ObjectKind::ExternalDataGroup => ["ltm", "data-group", "external"],
        ObjectKind::UrlCategory => ["sys", "url-db", "url-category"],
    }
}

fn verb_args(verb: &str, kind: ObjectKind, name: &str) -> Vec<String> {
    let mut out = vec![verb.to_string()];
    out.extend(object_path(kind).iter().map(|s| s.to_string()));
    out.push(name.to_string());
    out
}

/// Object name in a command built by [`verb_args`], for error reports
fn object_of(args: &[String]) -> String {
    args.get(1..5).map(|parts| parts.join(" ")).unwrap_or_else(|| args.join(" "))
}

/// Render a command for logs
fn render_command(args: &[String]) -> String {
    args.join(" ")
}

pub fn failover_status_args() -> Vec<String> {
    args(["show", "/cm", "failover-status", "field-fmt"])
}

pub fn query_args(kind: ObjectKind, name: &str) -> Vec<String> {
    verb_args("list", kind, name)
}

pub fn save_config_args() -> Vec<String> {
    args(["save", "sys", "config"])
}

pub fn sync_group_args(group: &str) -> Vec<String> {
    args(["run", "cm", "config-sync", "to-group", group])
}

fn value_type_name(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::String => "string",
        ValueType::Ip => "ip",
    }
}

fn source_path_arg(path: &std::path::Path) -> String {
    format!("file:{}", path.display())
}

/// Rule pattern as tmsh expects it
///
/// Glob rules get `*` escaped; exact rules are passed through verbatim.
pub fn rule_pattern(rule: &UrlRule) -> String {
    match rule.match_type {
        MatchType::Glob => rule.pattern.replace('*', "\\*"),
        MatchType::Exact => rule.pattern.clone(),
    }
}

fn push_rules(out: &mut Vec<String>, rules: &[UrlRule]) {
    out.push("{".to_string());
    for rule in rules {
        out.push(rule_pattern(rule));
        out.push("{".to_string());
        out.push("type".to_string());
        out.push(
            match rule.match_type {
                MatchType::Exact => "exact-match",
                MatchType::Glob => "glob-match",
            }
            .to_string(),
        );
        out.push("}".to_string());
    }
    out.push("}".to_string());
}

fn unsupported(operation: &str, kind: ObjectKind, params: &ObjectParams) -> Error {
    Error::invalid_input(format!(
        "cannot {operation} {kind} with {params:?}"
    ))
}

pub fn create_args(kind: ObjectKind, name: &str, params: &ObjectParams) -> Result<Vec<String>> {
    let mut out = verb_args("create", kind, name);
    match (kind, params) {
        (
            ObjectKind::DataGroupFile,
            ObjectParams::DataGroupFile {
                value_type,
                source_path,
            },
        ) => {
            out.extend([
                "type".to_string(),
                value_type_name(*value_type).to_string(),
                "source-path".to_string(),
                source_path_arg(source_path),
            ]);
        }
        (ObjectKind::ExternalDataGroup, ObjectParams::ExternalDataGroup { external_file_name }) => {
            out.extend(["external-file-name".to_string(), external_file_name.clone()]);
        }
        (ObjectKind::UrlCategory, ObjectParams::UrlCategory { display_name }) => {
            out.extend(["display-name".to_string(), display_name.clone()]);
        }
        _ => return Err(unsupported("create", kind, params)),
    }
    Ok(out)
}

pub fn modify_args(kind: ObjectKind, name: &str, params: &ObjectParams) -> Result<Vec<String>> {
    let mut out = verb_args("modify", kind, name);
    match (kind, params) {
        (ObjectKind::DataGroupFile, ObjectParams::DataGroupFile { source_path, .. }) => {
            out.extend(["source-path".to_string(), source_path_arg(source_path)]);
        }
        (ObjectKind::UrlCategory, ObjectParams::UrlRules { mode, rules }) => {
            out.push("urls".to_string());
            out.push(
                match mode {
                    RuleMode::ReplaceAll => "replace-all-with",
                    RuleMode::Add => "add",
                }
                .to_string(),
            );
            push_rules(&mut out, rules);
        }
        _ => return Err(unsupported("modify", kind, params)),
    }
    Ok(out)
}
