//! Static release history: listing, retention and pointer commands.

use crate::domain::shell::quote;

/// Release directory names from `ls -1` output, oldest first.
///
/// Names are UTC timestamps, so lexical order is chronological. Anything that
/// is not a 14-digit timestamp is ignored and never pruned.
#[must_use]
pub fn parse_releases(ls_output: &str) -> Vec<String> {
    let mut names: Vec<String> = ls_output
        .lines()
        .map(str::trim)
        .filter(|n| n.len() == 14 && n.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Releases to delete so that exactly `keep` most-recent remain.
///
/// `current` is never returned even if it falls outside the window.
#[must_use]
pub fn releases_to_prune(releases: &[String], keep: usize, current: Option<&str>) -> Vec<String> {
    let mut sorted: Vec<&String> = releases.iter().collect();
    sorted.sort();
    sorted.dedup();
    let excess = sorted.len().saturating_sub(keep);
    sorted
        .into_iter()
        .take(excess)
        .filter(|name| Some(name.as_str()) != current)
        .cloned()
        .collect()
}

/// Newest `*.tar.gz` in `dir`; prints nothing when there is none.
#[must_use]
pub fn find_artifact_command(dir: &str) -> String {
    format!(
        "ls -1t {}/*.tar.gz 2>/dev/null | head -n 1",
        quote(dir.trim_end_matches('/'))
    )
}

/// Target of the current pointer; exits non-zero on a first deploy.
#[must_use]
pub fn read_link_command(link: &str) -> String {
    format!("readlink {}", quote(link))
}

#[must_use]
pub fn list_releases_command(releases_dir: &str) -> String {
    format!("ls -1 {} 2>/dev/null || true", quote(releases_dir))
}

#[must_use]
pub fn extract_command(artifact: &str, release_dir: &str) -> String {
    format!(
        "mkdir -p {dir} && tar -xzf {} -C {dir} 2>&1",
        quote(artifact),
        dir = quote(release_dir)
    )
}

/// Release name a `readlink` of the current pointer refers to.
#[must_use]
pub fn release_from_link(target: &str) -> Option<String> {
    let name = target.trim().trim_end_matches('/').rsplit('/').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Atomically point `link` at `target`: build the new link under a temporary
/// name, then rename it over the old one. `mv -T` is a single rename(2).
#[must_use]
pub fn swap_pointer_command(target: &str, link: &str, nonce: &str) -> String {
    let tmp = format!("{link}.tmp-{nonce}");
    format!(
        "ln -sfn {} {} && mv -T {} {}",
        quote(target),
        quote(&tmp),
        quote(&tmp),
        quote(link)
    )
}

/// Replace `path` inside a release with a link into shared storage.
#[must_use]
pub fn link_shared_command(release_dir: &str, shared_dir: &str, path: &str) -> String {
    let rel = path.trim_matches('/');
    let in_release = format!("{release_dir}/{rel}");
    let in_shared = format!("{shared_dir}/{rel}");
    format!(
        "mkdir -p {shared} && rm -rf {target} && mkdir -p \"$(dirname {target})\" && ln -s {shared} {target}",
        shared = quote(&in_shared),
        target = quote(&in_release),
    )
}
