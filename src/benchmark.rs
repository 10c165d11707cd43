//! JSON record of a finished run, polled by external benchmark harnesses.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub task_id: String,
    pub task: String,
    pub status: String,
    pub duration_ms: u64,
    pub iterations: i64,
    pub final_message: String,
}

/// `<data dir>/ui_agent/benchmark_result.json`, or the working directory.
pub fn default_result_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ui_agent")
        .join("benchmark_result.json")
}

pub fn write_result(path: &Path, result: &BenchmarkResult) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(result)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Removes a stale record so pollers never read the previous run.
pub fn clear_result(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ui_agent_test_{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn write_then_clear() {
        let path = temp_path("benchmark_result.json");
        let result = BenchmarkResult {
            task_id: "a1b2c3d4".to_string(),
            task: "toggle Wi-Fi on".to_string(),
            status: "completed".to_string(),
            duration_ms: 4200,
            iterations: 3,
            final_message: "Wi-Fi is on".to_string(),
        };
        write_result(&path, &result).unwrap();
        let written: BenchmarkResult = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, result);

        clear_result(&path).unwrap();
        assert!(!path.exists());
        clear_result(&path).unwrap();
    }
}
