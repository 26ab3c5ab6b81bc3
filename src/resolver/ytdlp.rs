//! yt-dlp bridge resolver
//!
//! Runs `yt-dlp -f <format> -g <locator>` and reads the direct media URL
//! from stdout.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ResolutionResult, Resolve};
use crate::config::ResolverConfig;

/// stderr fragments yt-dlp prints when a channel simply has nothing live
const OFFLINE_SIGNATURES: &[&str] = &[
    "is offline",
    "not currently live",
    "will begin",
    "premieres in",
    "this live event has ended",
];

/// yt-dlp based resolver
pub struct YtDlpResolver {
    program: String,
    format: String,
    cookie_file: Option<PathBuf>,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            program: config.program.clone(),
            format: config.format.clone(),
            cookie_file: config.cookie_file.clone(),
            extra_args: config.extra_args.clone(),
            timeout: config.timeout(),
        }
    }

    /// Build the argument list; the cookie file is only passed if it exists right now
    fn build_args(&self, locator: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(cookies) = self.cookie_file.as_ref().filter(|p| p.is_file()) {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }

        args.extend(self.extra_args.iter().cloned());

        args.push("-f".to_string());
        args.push(self.format.clone());
        args.push("-g".to_string());
        args.push(locator.to_string());

        args
    }

    fn classify(status: ExitStatus, stdout: &str, stderr: &str) -> ResolutionResult {
        if !status.success() {
            let lowered = stderr.to_lowercase();
            if OFFLINE_SIGNATURES.iter().any(|sig| lowered.contains(sig)) {
                return ResolutionResult::Offline;
            }
            let detail = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exited with {status}"));
            return ResolutionResult::ExtractorError(detail);
        }

        // -g prints one URL per selected format; the first is the one we asked for
        match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(url) => ResolutionResult::Success(url.to_string()),
            None => ResolutionResult::Offline,
        }
    }
}

#[async_trait]
impl Resolve for YtDlpResolver {
    async fn resolve(&self, locator: &str) -> ResolutionResult {
        let args = self.build_args(locator);
        debug!("{} args: {:?}", self.program, args);

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", self.program, e);
                return ResolutionResult::ExtractorError(format!(
                    "failed to start {}: {}",
                    self.program, e
                ));
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("{} failed for {}: {}", self.program, locator, e);
                return ResolutionResult::ExtractorError(e.to_string());
            }
            Err(_) => {
                warn!(
                    "{} timed out after {:?} for {}",
                    self.program, self.timeout, locator
                );
                return ResolutionResult::ExtractorError(format!(
                    "timed out after {:?}",
                    self.timeout
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Self::classify(output.status, &stdout, &stderr)
    }
}
