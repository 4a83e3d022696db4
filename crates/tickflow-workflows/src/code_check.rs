//! Code-check workflow — clones or updates a repository, runs the configured
//! formatter and linter in the checkout, and reports a 0–100 quality score.
//! Optionally commits formatter changes to a fresh local branch (never pushed).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tickflow_core::{CodeCheckConfig, Result, TickflowError};
use tickflow_scheduler::{Task, Workflow, WorkflowResult};

const FIX_BRANCH_PREFIX: &str = "tickflow-optimize-";

/// Payload accepted by `code-optimizer` tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeCheckPayload {
    pub repo_url: String,
    /// Checkout directory name under the work dir.
    pub repo_name: String,
    #[serde(default)]
    pub branch: Option<String>,
}

impl CodeCheckPayload {
    fn validate(&self) -> std::result::Result<(), String> {
        let url = self.repo_url.trim();
        if url.is_empty() {
            return Err("repo_url is empty".into());
        }
        if url.starts_with('-') {
            return Err(format!("invalid repo_url '{}'", self.repo_url));
        }
        let name = self.repo_name.trim();
        if name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(format!("invalid repo_name '{}'", self.repo_name));
        }
        if let Some(branch) = self.branch.as_deref()
            && !is_valid_branch(branch)
        {
            return Err(format!("invalid branch '{branch}'"));
        }
        Ok(())
    }
}

fn is_valid_branch(branch: &str) -> bool {
    !branch.is_empty()
        && !branch.starts_with('-')
        && !branch.contains("..")
        && !branch.chars().any(char::is_whitespace)
}

/// Arguments for a shallow clone. `--` keeps the URL and destination out of option parsing.
fn clone_args<'a>(payload: &'a CodeCheckPayload, dest: &'a str) -> Vec<&'a str> {
    let mut args = vec!["clone", "--depth", "1"];
    if let Some(branch) = payload.branch.as_deref() {
        args.extend(["--branch", branch]);
    }
    args.extend(["--", payload.repo_url.trim(), dest]);
    args
}

/// `origin/main` → `main`, as printed by `git symbolic-ref --short refs/remotes/origin/HEAD`.
fn branch_from_remote_head(output: &str) -> Option<&str> {
    output
        .trim()
        .strip_prefix("origin/")
        .filter(|b| is_valid_branch(b))
}

/// Captured result of one external command.
#[derive(Debug)]
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

pub struct CodeCheckWorkflow {
    work_dir: PathBuf,
    formatter: Option<String>,
    linter: Option<String>,
    commit_fixes: bool,
}

impl CodeCheckWorkflow {
    pub const NAME: &'static str = "code-optimizer";

    pub fn new(config: CodeCheckConfig) -> Self {
        Self {
            work_dir: PathBuf::from(shellexpand::tilde(&config.work_dir).to_string()),
            formatter: config.formatter,
            linter: config.linter,
            commit_fixes: config.commit_fixes,
        }
    }

    /// Clone the repository, or bring an existing checkout up to date.
    async fn prepare_checkout(&self, payload: &CodeCheckPayload) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let repo_path = self.work_dir.join(payload.repo_name.trim());

        if repo_path.join(".git").exists() {
            tracing::info!("🔄 Repo {} exists, pulling latest", payload.repo_name);
            self.sync_checkout(&repo_path, payload.branch.as_deref()).await?;
        } else {
            tracing::info!("📦 Cloning {}", payload.repo_url);
            let dest = repo_path.to_string_lossy().to_string();
            let out = run_command("git", &clone_args(payload, &dest), &self.work_dir).await?;
            ensure_success("git clone", &out)?;
        }
        Ok(repo_path)
    }

    /// Reset an existing checkout onto the latest `branch` from origin, or the
    /// remote default branch when none is requested.
    async fn sync_checkout(&self, repo_path: &Path, branch: Option<&str>) -> Result<()> {
        // Uncommitted formatter output from an earlier run.
        let out = run_command("git", &["reset", "--hard"], repo_path).await?;
        ensure_success("git reset", &out)?;
        let out = run_command("git", &["clean", "-fd"], repo_path).await?;
        ensure_success("git clean", &out)?;

        let target = match branch {
            Some(b) => b.to_string(),
            None => default_branch(repo_path).await?,
        };
        tracing::debug!("Syncing {} to origin/{}", repo_path.display(), target);

        let out = run_command("git", &["fetch", "--", "origin", &target], repo_path).await?;
        ensure_success("git fetch", &out)?;
        let out = run_command("git", &["checkout", "-B", &target, "FETCH_HEAD"], repo_path).await?;
        ensure_success("git checkout", &out)?;
        Ok(())
    }

    /// Commit everything the formatter changed onto a new local branch, then
    /// switch back so the next run starts from the tracked branch.
    async fn commit_changes(&self, repo_path: &Path, score: u32) -> Result<String> {
        let branch = format!("{FIX_BRANCH_PREFIX}{}", chrono::Utc::now().timestamp());
        let message = format!("chore: optimize code (Score: {score}/100)");

        let out = run_command("git", &["checkout", "-b", &branch], repo_path).await?;
        ensure_success("git checkout", &out)?;
        let out = run_command("git", &["add", "."], repo_path).await?;
        ensure_success("git add", &out)?;
        let out = run_command("git", &["commit", "-m", &message], repo_path).await?;
        ensure_success("git commit", &out)?;
        let out = run_command("git", &["checkout", "-"], repo_path).await?;
        ensure_success("git checkout", &out)?;

        tracing::info!("🌿 Created branch {} with fixes", branch);
        Ok(branch)
    }
}

#[async_trait]
impl Workflow for CodeCheckWorkflow {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, task: &Task) -> Result<WorkflowResult> {
        let payload: CodeCheckPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(p) => p,
            Err(e) => return Ok(WorkflowResult::permanent(format!("Invalid code-check payload: {e}"))),
        };
        if let Err(reason) = payload.validate() {
            return Ok(WorkflowResult::permanent(reason));
        }
        if self.formatter.is_none() && self.linter.is_none() {
            return Ok(WorkflowResult::permanent(
                "No formatter or linter configured for code checks",
            ));
        }

        // Git failures surface as errors and are retried by the scheduler.
        let repo_path = self.prepare_checkout(&payload).await?;

        let mut findings = 0u32;
        let mut tools_with_files = 0;
        if let Some(formatter) = self.formatter.as_deref() {
            tracing::info!("🧹 Running formatter: {}", formatter);
            let out = run_command_line(formatter, &repo_path).await?;
            if !reports_no_files(&out) {
                tools_with_files += 1;
            }
            if !out.success {
                tracing::warn!("⚠️ Formatter exited with failure: {}", first_line(&out.stderr));
                findings += 1;
            }
        }

        let mut score = 100;
        if let Some(linter) = self.linter.as_deref() {
            tracing::info!("🔍 Running linter: {}", linter);
            let out = run_command_line(linter, &repo_path).await?;
            if !reports_no_files(&out) {
                tools_with_files += 1;
            }
            if let Some(s) = parse_lint_score(&out.stdout) {
                score = s;
            }
            if !out.success {
                findings += 1;
            }
        }

        if tools_with_files == 0 {
            tracing::warn!("⚠️ No supported code files found in {}", payload.repo_name);
            return Ok(WorkflowResult::permanent("No supported code files found"));
        }

        let status = run_command("git", &["status", "--porcelain"], &repo_path).await?;
        ensure_success("git status", &status)?;
        let changed = status.stdout.lines().filter(|l| !l.trim().is_empty()).count();

        let branch = if changed > 0 && self.commit_fixes {
            Some(self.commit_changes(&repo_path, score).await?)
        } else {
            if changed == 0 {
                tracing::info!("✨ Code is clean, no fixes needed");
            }
            None
        };

        tracing::info!(
            "📊 {} scored {}/100 ({} findings, {} changed files)",
            payload.repo_name,
            score,
            findings,
            changed
        );
        Ok(WorkflowResult::ok_with(serde_json::json!({
            "score": score,
            "findings": findings,
            "changed": changed,
            "branch": branch,
        })))
    }
}

/// Extract a linter rating such as `Your code has been rated at 7.35/10`, scaled to 0–100.
fn parse_lint_score(output: &str) -> Option<u32> {
    let rest = output.split("rated at ").nth(1)?;
    let value = rest.split('/').next()?.trim();
    let rating: f64 = value.parse().ok()?;
    Some((rating * 10.0).round().clamp(0.0, 100.0) as u32)
}

/// Phrases formatters and linters print when there was nothing to check.
const NO_FILES_MARKERS: &[&str] = &[
    "no python files are present",
    "no python files found",
    "no files to lint",
    "no files matching",
];

fn reports_no_files(out: &CommandOutput) -> bool {
    let stdout = out.stdout.to_lowercase();
    let stderr = out.stderr.to_lowercase();
    NO_FILES_MARKERS
        .iter()
        .any(|m| stdout.contains(m) || stderr.contains(m))
}

/// Name of the remote default branch, falling back to the current branch.
async fn default_branch(repo_path: &Path) -> Result<String> {
    let out = run_command(
        "git",
        &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
        repo_path,
    )
    .await?;
    if out.success
        && let Some(branch) = branch_from_remote_head(&out.stdout)
    {
        return Ok(branch.to_string());
    }

    let out = run_command("git", &["branch", "--show-current"], repo_path).await?;
    let current = out.stdout.trim();
    if out.success && is_valid_branch(current) && !current.starts_with(FIX_BRANCH_PREFIX) {
        Ok(current.to_string())
    } else {
        Err(TickflowError::Process(format!(
            "cannot determine default branch of {}",
            repo_path.display()
        )))
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

fn ensure_success(what: &str, out: &CommandOutput) -> Result<()> {
    if out.success {
        Ok(())
    } else {
        Err(TickflowError::Process(format!(
            "{what} failed: {}",
            first_line(&out.stderr)
        )))
    }
}

/// Split a configured command line on whitespace and run it.
async fn run_command_line(line: &str, cwd: &Path) -> Result<CommandOutput> {
    let mut parts = line.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| TickflowError::Config("empty command line".into()))?;
    let args: Vec<&str> = parts.collect();
    run_command(program, &args, cwd).await
}

async fn run_command(program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput> {
    tracing::debug!("$ {} {}", program, args.join(" "));
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| TickflowError::Process(format!("{program} not runnable: {e}")))?;
    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
