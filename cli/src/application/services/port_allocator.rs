//! Port allocator: picks a free host port on the application host.
//!
//! Leases are advisory: a port is free at probe time and nothing reserves it
//! until `docker run` binds it. Candidates are probed a few at a time so one
//! round trip covers several draws; the first free candidate in draw order
//! wins.

use anyhow::Result;
use rand::Rng as _;

use crate::application::ports::RemoteExecutor;
use crate::application::services::remote::step_failed;
use crate::domain::shell::listening_probe;
use crate::domain::{BatchJob, DeployError, HostRole, PortRange};

/// Draws per round trip; skipped draws leave their slot empty.
pub const PROBES_PER_ROUND: u32 = 5;

/// Where candidate ports come from.
pub trait CandidateSource: Send {
    /// Next candidate. Values outside `range` are skipped by the caller.
    fn next_candidate(&mut self, range: PortRange) -> u16;
}

/// Uniform draws over the whole range.
#[derive(Debug, Default)]
pub struct UniformCandidates;

impl CandidateSource for UniformCandidates {
    fn next_candidate(&mut self, range: PortRange) -> u16 {
        rand::thread_rng().gen_range(range.start..=range.end)
    }
}

/// Pick a free port in `range`, never one of `exclude`.
///
/// Every draw counts against `range.max_attempts`, including draws that hit
/// an excluded port.
///
/// # Errors
///
/// Returns [`DeployError::PortExhaustion`] when the budget runs out (or the
/// range holds nothing but excluded ports), a remote-step error when the
/// probe itself fails, or a gateway error.
pub async fn pick(
    remote: &impl RemoteExecutor,
    range: PortRange,
    exclude: &[u16],
    candidates: &mut impl CandidateSource,
) -> Result<u16> {
    let exhausted = |attempts| DeployError::PortExhaustion {
        start: range.start,
        end: range.end,
        attempts,
    };

    let excluded_in_range = exclude.iter().filter(|p| range.contains(**p)).count();
    if u32::try_from(excluded_in_range).is_ok_and(|n| n >= range.size()) {
        return Err(exhausted(0).into());
    }

    let mut attempts = 0;
    while attempts < range.max_attempts {
        let mut round = Vec::new();
        for _ in 0..PROBES_PER_ROUND {
            if attempts >= range.max_attempts {
                break;
            }
            attempts += 1;
            let candidate = candidates.next_candidate(range);
            if !range.contains(candidate) || exclude.contains(&candidate) || round.contains(&candidate) {
                continue;
            }
            round.push(candidate);
        }
        if round.is_empty() {
            continue;
        }

        let mut job = BatchJob::new();
        for port in &round {
            job.add(port.to_string(), listening_probe(*port));
        }
        let result = remote.execute(HostRole::Application, job).await?;
        for port in &round {
            let outcome = result.get(&port.to_string())?;
            if !outcome.success() {
                return Err(step_failed(HostRole::Application, outcome).into());
            }
            if outcome.trimmed().is_empty() {
                tracing::debug!(port, attempts, "leased port");
                return Ok(*port);
            }
            tracing::trace!(port, "port in use");
        }
    }

    Err(exhausted(attempts).into())
}
