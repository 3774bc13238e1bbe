use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::process::Command;

/// Environment forced on every judged child: common numeric libraries are
/// pinned to a single thread so a submission cannot multiply its CPU budget
/// through BLAS/OpenMP thread pools.
pub const SINGLE_THREAD_ENV: &[(&str, &str)] = &[
    ("OMP_NUM_THREADS", "1"),
    ("OPENBLAS_NUM_THREADS", "1"),
    ("MKL_NUM_THREADS", "1"),
    ("NUMEXPR_NUM_THREADS", "1"),
    ("VECLIB_MAXIMUM_THREADS", "1"),
    ("GOTO_NUM_THREADS", "1"),
];

/// Resource limits applied to one judged child before exec.
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    /// Wall-clock limit; RLIMIT_CPU is set to this plus one second.
    pub time_limit: Duration,
    /// RLIMIT_AS and RLIMIT_DATA, in bytes.
    pub memory_bytes: u64,
    /// RLIMIT_NPROC.
    pub max_processes: u64,
    /// RLIMIT_FSIZE, in bytes.
    pub max_output_bytes: u64,
}

/// Map of child pid → process group id for every judged subprocess currently
/// alive in this worker. `kill_tree` consults it so a timed-out child can be
/// signalled as a whole group even after its `Child` handle is gone.
static PROCESS_GROUPS: Lazy<Mutex<HashMap<u32, u32>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn register_child(pid: u32) {
    // setpgid(0, 0) in pre_exec makes the child its own group leader.
    if let Ok(mut map) = PROCESS_GROUPS.lock() {
        map.insert(pid, pid);
    }
}

pub fn unregister_child(pid: u32) {
    if let Ok(mut map) = PROCESS_GROUPS.lock() {
        map.remove(&pid);
    }
}

/// Configure a command for sandboxed execution: single-thread environment,
/// own process group, and rlimits applied in the child between fork and exec.
pub fn apply(cmd: &mut Command, limits: SandboxLimits) {
    for (key, value) in SINGLE_THREAD_ENV {
        cmd.env(key, value);
    }

    let cpu_secs = limits.time_limit.as_secs() + 1;
    let memory = limits.memory_bytes;
    let nproc = limits.max_processes;
    let fsize = limits.max_output_bytes;

    // SAFETY: the closure runs in the forked child before exec and only
    // calls async-signal-safe libc functions; it must not allocate.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            set_rlimit(libc::RLIMIT_CPU, cpu_secs)?;
            set_rlimit(libc::RLIMIT_AS, memory)?;
            set_rlimit(libc::RLIMIT_DATA, memory)?;
            set_rlimit(libc::RLIMIT_NPROC, nproc)?;
            set_rlimit(libc::RLIMIT_FSIZE, fsize)?;
            // Crashing submissions must not litter the working dir with cores.
            set_rlimit(libc::RLIMIT_CORE, 0)?;
            Ok(())
        });
    }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, value: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };
    // SAFETY: plain syscall with a stack-allocated struct.
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Kill a judged child and everything it spawned.
///
/// Signals the registered process group first, then walks the process table
/// for surviving descendants, and always finishes with a direct kill of the
/// root pid regardless of earlier errors.
pub fn kill_tree(pid: u32) {
    let pgid = PROCESS_GROUPS
        .lock()
        .ok()
        .and_then(|map| map.get(&pid).copied())
        .unwrap_or(pid);

    // SAFETY: kill(2) with a negative pid signals the whole group.
    unsafe {
        libc::kill(-(pgid as i32), libc::SIGKILL);
    }

    for child in descendants_of(pid) {
        unsafe {
            libc::kill(child as i32, libc::SIGKILL);
        }
    }

    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

// ---------------------------------------------------------------------------
// Process-table helpers (/proc)
// ---------------------------------------------------------------------------

/// Direct children of a process, from `/proc/<pid>/task/*/children`.
pub fn children_of(pid: u32) -> Vec<u32> {
    let task_dir = format!("/proc/{pid}/task");
    let mut children = Vec::new();
    let Ok(entries) = fs::read_dir(&task_dir) else {
        return children;
    };
    for entry in entries.flatten() {
        let path = entry.path().join("children");
        if let Ok(contents) = fs::read_to_string(&path) {
            children.extend(
                contents
                    .split_ascii_whitespace()
                    .filter_map(|tok| tok.parse::<u32>().ok()),
            );
        }
    }
    children
}

/// All transitive descendants of a process.
pub fn descendants_of(pid: u32) -> Vec<u32> {
    let mut out = Vec::new();
    let mut frontier = children_of(pid);
    while let Some(child) = frontier.pop() {
        if out.contains(&child) {
            continue;
        }
        frontier.extend(children_of(child));
        out.push(child);
    }
    out
}

/// Wall-clock age of a process, from its starttime in `/proc/<pid>/stat`
/// against `/proc/uptime`. `None` if the process is gone or unparsable.
pub fn process_age(pid: u32) -> Option<Duration> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Field 22 (starttime) counts from the end of the parenthesized comm,
    // which may itself contain spaces.
    let after_comm = &stat[stat.rfind(')')? + 2..];
    let starttime_ticks: u64 = after_comm.split_ascii_whitespace().nth(19)?.parse().ok()?;

    let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks_per_sec <= 0 {
        return None;
    }
    let started_secs = starttime_ticks as f64 / ticks_per_sec as f64;

    let uptime = fs::read_to_string("/proc/uptime").ok()?;
    let uptime_secs: f64 = uptime.split_ascii_whitespace().next()?.parse().ok()?;

    let age = uptime_secs - started_secs;
    if age < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(age))
}

/// Peak-tracking RSS sample for one process, in MB, from
/// `/proc/<pid>/status`. `None` once the process has exited.
pub fn rss_mb(pid: u32) -> Option<f64> {
    let status = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: f64 = rest
                .trim()
                .split_ascii_whitespace()
                .next()?
                .parse()
                .ok()?;
            return Some(kb / 1024.0);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_has_an_age() {
        let age = process_age(std::process::id()).expect("own /proc entry readable");
        assert!(age < Duration::from_secs(60 * 60 * 24 * 365));
    }

    #[test]
    fn own_process_has_rss() {
        let rss = rss_mb(std::process::id()).expect("own VmRSS readable");
        assert!(rss > 0.0);
    }

    #[test]
    fn dead_pid_yields_none() {
        // Pid 4194304 is above the default pid_max.
        assert!(process_age(4_194_304).is_none());
        assert!(rss_mb(4_194_304).is_none());
    }

    #[test]
    fn registry_round_trip() {
        register_child(99_999_999);
        unregister_child(99_999_999);
    }
}
