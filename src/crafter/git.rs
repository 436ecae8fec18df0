//! Best-effort git context of the working directory

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::api::{HeadCommit, Remote};

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|e| debug!(error = %e, "git not available"))
        .ok()?;
    if !output.status.success() {
        debug!(
            args = ?args,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git command failed"
        );
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Head commit of the repository containing `dir`; `None` outside a repository
pub fn head_commit(dir: &Path) -> Option<HeadCommit> {
    let inside = git(dir, &["rev-parse", "--is-inside-work-tree"])?;
    if inside.trim() != "true" {
        return None;
    }

    let log = git(dir, &["log", "-1", "--format=%H%x00%an%x00%ae%x00%cI%x00%B"])?;
    let mut commit = parse_log(&log)?;
    if let Some(remotes) = git(dir, &["remote", "-v"]) {
        commit.remotes = parse_remotes(&remotes);
    }
    Some(commit)
}

/// NUL-separated `hash, author, email, date, message`
fn parse_log(log: &str) -> Option<HeadCommit> {
    let mut fields = log.splitn(5, '\0');
    let hash = fields.next()?.trim().to_string();
    let author_name = fields.next()?.to_string();
    let author_email = fields.next()?.to_string();
    let date = DateTime::parse_from_rfc3339(fields.next()?.trim())
        .ok()?
        .with_timezone(&Utc);
    let message = fields.next().unwrap_or_default().trim_end().to_string();

    if hash.is_empty() {
        return None;
    }
    Some(HeadCommit {
        hash,
        author_name,
        author_email,
        date,
        message,
        remotes: Vec::new(),
    })
}

/// `git remote -v` output, one entry per remote name
fn parse_remotes(output: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
            continue;
        };
        if remotes.iter().any(|r| r.name == name) {
            continue;
        }
        remotes.push(Remote {
            name: name.to_string(),
            url: sanitize_remote_url(url),
        });
    }
    remotes
}

/// Drop credentials embedded in a remote URL
pub fn sanitize_remote_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let authority_end = url[authority_start..]
        .find('/')
        .map(|i| authority_start + i)
        .unwrap_or(url.len());
    match url[authority_start..authority_end].rfind('@') {
        Some(at) => format!("{}{}", &url[..authority_start], &url[authority_start + at + 1..]),
        None => url.to_string(),
    }
}
