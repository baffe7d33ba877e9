//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tiered_cache::error::DriverResult;
use tiered_cache::{Driver, DriverError, DriverKind};

// == Flaky Driver ==
/// In-memory backend whose health and failures are controlled by the test.
pub struct FlakyDriver {
    kind: DriverKind,
    available: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    failing_removals: Mutex<HashSet<String>>,
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl FlakyDriver {
    pub fn new(kind: DriverKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            available: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            failing_removals: Mutex::new(HashSet::new()),
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn unavailable(kind: DriverKind) -> Arc<Self> {
        let driver = Self::new(kind);
        driver.set_available(false);
        driver
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removal_of(&self, key: &str) {
        self.failing_removals.lock().insert(key.to_string());
    }

    pub fn allow_removal_of(&self, key: &str) {
        self.failing_removals.lock().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn check_available(&self) -> DriverResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::Unavailable(self.kind))
        }
    }
}

#[async_trait]
impl Driver for FlakyDriver {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> DriverResult<()> {
        self.check_available()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DriverError::Io(anyhow::anyhow!("simulated write failure")));
        }
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> DriverResult<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::Io(anyhow::anyhow!("simulated read failure")));
        }
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn has(&self, key: &str) -> bool {
        self.contains(key)
    }

    async fn remove(&self, key: &str) -> DriverResult<()> {
        self.check_available()?;
        if self.failing_removals.lock().contains(key) {
            return Err(DriverError::Io(anyhow::anyhow!("simulated removal failure")));
        }
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> DriverResult<()> {
        self.check_available()?;
        self.entries.lock().clear();
        Ok(())
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

// == Log Capture ==
/// Collects formatted log output so tests can assert on it.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Installs a thread-local subscriber writing into the returned buffer.
///
/// Only valid for current-thread runtimes, which `#[tokio::test]` uses by default.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
