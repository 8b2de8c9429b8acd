use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use stepcore::{LockError, LockHandle, LockService};
use tokio::sync::Mutex;
use tokio::time::Instant;

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// In-process lock service with bounded wait. The TTL is accepted but not
/// enforced; nothing in-process outlives its caller.
#[derive(Default)]
pub struct MemoryLockService {
    held: Mutex<HashMap<String, u64>>,
    counter: AtomicU64,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(
        &self,
        name: &str,
        wait: Duration,
        _ttl: Duration,
    ) -> Result<Option<LockHandle>, LockError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut held = self.held.lock().await;
                if !held.contains_key(name) {
                    let token = self.counter.fetch_add(1, Ordering::SeqCst);
                    held.insert(name.to_string(), token);
                    return Ok(Some(LockHandle {
                        name: name.to_string(),
                        token,
                    }));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn release(&self, name: &str, handle: LockHandle) -> Result<bool, LockError> {
        let mut held = self.held.lock().await;
        match held.get(name) {
            Some(token) if *token == handle.token => {
                held.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
