//! Per-environment deploy lock on the system host.
//!
//! `mkdir` is atomic, so the first run to create the lock directory owns it.
//! The owner token and acquisition time are written inside for diagnostics
//! and stale-lock detection.

use crate::domain::shell::quote;

/// Lock directory for one product+environment.
#[must_use]
pub fn lock_path(lock_dir: &str, product: &str, environment: &str) -> String {
    format!("{}/{product}-{environment}.lock", lock_dir.trim_end_matches('/'))
}

/// Acquire the lock, breaking it first if it is older than `stale_secs`.
///
/// Prints `acquired` on success, `stale-broken` when an abandoned lock was
/// replaced, or `held <owner>` when another run holds it.
#[must_use]
pub fn acquire_command(path: &str, token: &str, stale_secs: u64) -> String {
    let p = quote(path);
    let owner = quote(&format!("{path}/owner"));
    let t = quote(token);
    format!(
        "mkdir -p \"$(dirname {p})\"\n\
         if mkdir {p} 2>/dev/null; then printf '%s %s\\n' {t} \"$(date +%s)\" > {owner}; echo acquired; exit 0; fi\n\
         since=$(awk '{{print $2}}' {owner} 2>/dev/null)\n\
         now=$(date +%s)\n\
         if [ -n \"$since\" ] && [ $((now - since)) -gt {stale_secs} ]; then\n\
         \x20 rm -rf {p} && mkdir {p} && printf '%s %s\\n' {t} \"$now\" > {owner} && echo stale-broken && exit 0\n\
         fi\n\
         printf 'held %s\\n' \"$(cat {owner} 2>/dev/null || echo unknown)\""
    )
}

/// Release the lock only if this run still owns it.
#[must_use]
pub fn release_command(path: &str, token: &str) -> String {
    let p = quote(path);
    let owner = quote(&format!("{path}/owner"));
    format!(
        "if [ \"$(awk '{{print $1}}' {owner} 2>/dev/null)\" = {} ]; then rm -rf {p}; fi",
        quote(token)
    )
}

/// Outcome of an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Acquired,
    BrokeStale,
    Held(String),
}

/// Parse [`acquire_command`] output.
#[must_use]
pub fn parse_acquire(output: &str) -> LockState {
    let line = output.lines().last().unwrap_or("").trim();
    match line {
        "acquired" => LockState::Acquired,
        "stale-broken" => LockState::BrokeStale,
        other => LockState::Held(
            other
                .strip_prefix("held ")
                .unwrap_or(other)
                .trim()
                .to_string(),
        ),
    }
}
