//! Parent process liveness.
//!
//! The connector is launched by a host application and must not outlive it.
//! Each host-loop tick asks whether a process with the configured name is
//! still running; once it is gone the connector shuts down.
//!
//! # Platform Support
//!
//! - **Linux**: reads `/proc/<pid>/comm`
//! - **Windows**: parses `tasklist /FO CSV /NH`
//! - **Other**: parses `ps -A -o comm=`

#[cfg(not(target_os = "linux"))]
use std::process::Command;
use tracing::debug;

/// Linux truncates `comm` to 15 bytes.
#[cfg(target_os = "linux")]
const COMM_MAX: usize = 15;

#[derive(Debug, Clone)]
pub struct ParentWatch {
    process_name: Option<String>,
}

impl ParentWatch {
    pub fn new(process_name: Option<String>) -> Self {
        Self { process_name }
    }

    pub fn disabled() -> Self {
        Self { process_name: None }
    }

    pub fn process_name(&self) -> Option<&str> {
        self.process_name.as_deref()
    }

    /// Always true when no parent is configured.
    pub fn parent_alive(&self) -> bool {
        match self.process_name.as_deref() {
            Some(name) => is_process_running(name),
            None => true,
        }
    }
}

/// Whether any process whose executable name matches `name` is running.
/// A trailing `.exe` on either side is ignored, comparison is
/// case-insensitive.
pub fn is_process_running(name: &str) -> bool {
    let wanted = normalize(name);
    if wanted.is_empty() {
        return false;
    }
    let found = running_process_names()
        .iter()
        .any(|candidate| names_match(&normalize(candidate), &wanted));
    debug!(process = name, found, "parent process check");
    found
}

fn normalize(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_ascii_lowercase();
    match base.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => base,
    }
}

#[cfg(target_os = "linux")]
fn names_match(candidate: &str, wanted: &str) -> bool {
    candidate == wanted || (candidate.len() == COMM_MAX && wanted.starts_with(candidate))
}

#[cfg(not(target_os = "linux"))]
fn names_match(candidate: &str, wanted: &str) -> bool {
    candidate == wanted
}

#[cfg(target_os = "linux")]
fn running_process_names() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()))
        .filter_map(|e| std::fs::read_to_string(e.path().join("comm")).ok())
        .map(|comm| comm.trim().to_string())
        .collect()
}

#[cfg(windows)]
fn running_process_names() -> Vec<String> {
    let Ok(output) = Command::new("tasklist").args(["/FO", "CSV", "/NH"]).output() else {
        return Vec::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(|field| field.trim_matches('"').to_string())
        .collect()
}

#[cfg(not(any(target_os = "linux", windows)))]
fn running_process_names() -> Vec<String> {
    let Ok(output) = Command::new("ps").args(["-A", "-o", "comm="]).output() else {
        return Vec::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_path_and_exe() {
        assert_eq!(normalize("C:\\Program Files\\ReachFMS\\ReachFMS.exe"), "reachfms");
        assert_eq!(normalize("/usr/bin/reachfms"), "reachfms");
        assert_eq!(normalize("reachfms"), "reachfms");
    }

    #[test]
    fn disabled_watch_is_always_alive() {
        assert!(ParentWatch::disabled().parent_alive());
    }

    #[test]
    fn missing_process_is_not_running() {
        assert!(!is_process_running("definitely-not-a-real-process-4711"));
        assert!(!is_process_running(""));
        let watch = ParentWatch::new(Some("definitely-not-a-real-process-4711".to_string()));
        assert!(!watch.parent_alive());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_is_running() {
        let comm = std::fs::read_to_string("/proc/self/comm").unwrap();
        assert!(is_process_running(comm.trim()));
    }
}
