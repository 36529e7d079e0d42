//! Shell snippet builders for remote file operations.
//!
//! Every path and payload is single-quoted; file contents travel base64
//! encoded so arbitrary bytes survive the trip through `bash -s`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Single-quote `s` for POSIX shells.
#[must_use]
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Optional `sudo ` prefix for privileged proxy-side commands.
#[must_use]
pub fn sudo(enabled: bool) -> &'static str {
    if enabled { "sudo " } else { "" }
}

/// Exit code of [`read_file`] when the file does not exist.
pub const ABSENT_EXIT: i32 = 3;

/// Print a file verbatim. Exits [`ABSENT_EXIT`] when it does not exist and
/// `cat`'s own code when it exists but cannot be read.
#[must_use]
pub fn read_file(path: &str, use_sudo: bool) -> String {
    let quoted = quote(path);
    let sudo = sudo(use_sudo);
    format!("{sudo}test -e {quoted} || exit {ABSENT_EXIT}; {sudo}cat {quoted}")
}

/// Write `content` to `path`, creating the parent directory.
#[must_use]
pub fn write_file(path: &str, content: &str) -> String {
    let parent = parent_of(path);
    format!(
        "mkdir -p {} && printf '%s' {} | base64 -d > {}",
        quote(parent),
        quote(&STANDARD.encode(content.as_bytes())),
        quote(path)
    )
}

/// Move `from` over `to` (rename within a filesystem).
#[must_use]
pub fn move_file(from: &str, to: &str, use_sudo: bool) -> String {
    format!("{}mv -f {} {}", sudo(use_sudo), quote(from), quote(to))
}

/// Remove files if present.
#[must_use]
pub fn remove_files(paths: &[&str], use_sudo: bool) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| quote(p)).collect();
    format!("{}rm -f {}", sudo(use_sudo), quoted.join(" "))
}

/// Recursively remove directories or files; never fails on absence.
#[must_use]
pub fn remove_tree(paths: &[&str], use_sudo: bool) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| quote(p)).collect();
    format!("{}rm -rf {}", sudo(use_sudo), quoted.join(" "))
}

#[must_use]
pub fn make_dirs(paths: &[&str], use_sudo: bool) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| quote(p)).collect();
    format!("{}mkdir -p {}", sudo(use_sudo), quoted.join(" "))
}

/// Exit 0 iff `path` exists (links are followed).
#[must_use]
pub fn exists(path: &str) -> String {
    format!("test -e {}", quote(path))
}

/// Lists TCP listeners on `port`; empty output means the port is free.
#[must_use]
pub fn listening_probe(port: u16) -> String {
    format!("ss -Htln 'sport = :{port}'")
}

/// Decode a payload produced by [`write_file`]. Used by test fakes that
/// simulate a remote host.
#[must_use]
pub fn decode_payload(b64: &str) -> Option<String> {
    STANDARD
        .decode(b64)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}
