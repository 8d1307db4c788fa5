use std::{io, mem};

use rama::telemetry::tracing;

pub use libc::rlim_t;

/// Raise the soft `RLIMIT_NOFILE` limit towards `target`,
/// capped by the hard limit.
///
/// Returns the soft limit in effect afterwards. Every in-flight bid holds
/// a socket, so this is the ceiling for concurrent bids of the process.
pub fn raise_nofile(target: rlim_t) -> io::Result<rlim_t> {
    let mut lim = get_nofile()?;

    let Some(new_soft) = next_soft_limit(lim.rlim_cur, lim.rlim_max, target) else {
        tracing::debug!(
            ulimit.current = lim.rlim_cur,
            ulimit.target = target,
            "ulimit: current soft limit kept",
        );
        return Ok(lim.rlim_cur);
    };

    let previous_value = lim.rlim_cur;
    lim.rlim_cur = new_soft;
    // SAFETY: `lim` is a valid, initialized rlimit.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    tracing::info!("ulimit: raised soft limit of open files to {new_soft} (was {previous_value})");

    Ok(new_soft)
}

fn get_nofile() -> io::Result<libc::rlimit> {
    // SAFETY: rlimit is plain old data, fully written by getrlimit on success.
    unsafe {
        let mut lim: libc::rlimit = mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(lim)
    }
}

/// Soft limit to apply for `target`, `None` if `current` is kept.
///
/// A soft limit is never lowered.
fn next_soft_limit(current: rlim_t, hard: rlim_t, target: rlim_t) -> Option<rlim_t> {
    let new_soft = target.min(hard);
    (new_soft > current).then_some(new_soft)
}
