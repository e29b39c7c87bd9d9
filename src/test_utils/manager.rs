//! A [`ServiceManager`] that records calls instead of touching the OS.

use crate::platform::ServiceManager;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct RecordingManager {
    calls: Arc<Mutex<Vec<String>>>,
    fail_on: Option<&'static str>,
    live_swap: bool,
    watch: Option<PathBuf>,
    observed_at_stop: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Default for RecordingManager {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            fail_on: None,
            live_swap: true,
            watch: None,
            observed_at_stop: Arc::default(),
        }
    }
}

impl RecordingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` (e.g. `"stop"`) fail.
    pub fn fail_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    /// Behave like a platform that cannot restart into a swapped binary.
    pub fn without_live_swap(mut self) -> Self {
        self.live_swap = false;
        self
    }

    /// Capture the contents of `path` when `stop` is called.
    pub fn watch(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch = Some(path.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Contents of the watched file at the time `stop` ran.
    pub fn observed_at_stop(&self) -> Option<Vec<u8>> {
        self.observed_at_stop.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        if self.fail_on == Some(operation) {
            return Err(anyhow!("{operation} failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for RecordingManager {
    fn kind(&self) -> &'static str {
        "recording"
    }

    async fn install(&self) -> Result<()> {
        self.record("install")
    }

    async fn uninstall(&self) -> Result<()> {
        self.record("uninstall")
    }

    async fn start(&self) -> Result<()> {
        self.record("start")
    }

    async fn stop(&self) -> Result<()> {
        if let Some(path) = &self.watch {
            *self.observed_at_stop.lock().unwrap() = std::fs::read(path).ok();
        }
        self.record("stop")
    }

    async fn restart(&self) -> Result<()> {
        self.record("restart")
    }

    async fn status(&self) -> Result<String> {
        self.record("status")?;
        Ok("active (recording)".to_string())
    }

    async fn reload(&self) -> Result<()> {
        self.record("reload")
    }

    fn supports_live_swap(&self) -> bool {
        self.live_swap
    }
}
