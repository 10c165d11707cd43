//! Android host driven over `adb`: uiautomator dumps for structure,
//! `screencap` for pixels and `input` for gestures.

mod accessibility;
mod events;

use std::env;
use std::process::Output;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::process::Command;

use crate::host::{Host, NoTextRecognizer};

pub use accessibility::{class_to_type, parse_hierarchy};
pub use events::{escape_input_text, keycode};

#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb: String,
    serial: Option<String>,
    dump_retries: u32,
}

impl AdbDevice {
    pub fn new(serial: Option<String>) -> Self {
        Self {
            adb: "adb".to_string(),
            serial,
            dump_retries: 3,
        }
    }

    /// `ADB_PATH` and `ANDROID_SERIAL` override the defaults.
    pub fn from_env() -> Self {
        let mut device = Self::new(env::var("ANDROID_SERIAL").ok().filter(|s| !s.trim().is_empty()));
        if let Ok(path) = env::var("ADB_PATH") {
            if !path.trim().is_empty() {
                device.adb = path;
            }
        }
        device
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run adb {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "adb {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output)
    }

    pub(crate) async fn shell(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let output = self.run(&full).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub(crate) async fn exec_out(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut full = vec!["exec-out"];
        full.extend_from_slice(args);
        Ok(self.run(&full).await?.stdout)
    }

    /// Preflight: a device must be attached and authorized.
    pub async fn check_connection(&self) -> Result<()> {
        let output = self.run(&["get-state"]).await?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if state != "device" {
            return Err(anyhow::anyhow!("adb device state is '{}', expected 'device'", state));
        }
        Ok(())
    }

    /// Bundles this device as every host collaborator. There is no on-device
    /// OCR, so text recognition is a no-op.
    pub fn into_host(self) -> Host {
        let device = Arc::new(self);
        Host {
            screen: device.clone(),
            inspector: device.clone(),
            ocr: Arc::new(NoTextRecognizer),
            dispatcher: device,
        }
    }
}
