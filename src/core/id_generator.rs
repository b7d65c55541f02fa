use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// Custom epoch (2024-01-01T00:00:00Z) for snowflake timestamps.
const EPOCH_MILLIS: i64 = 1_704_067_200_000;
const SEQUENCE_BITS: u32 = 12;
const WORKER_BITS: u32 = 10;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_WORKER: u16 = (1 << WORKER_BITS) - 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdGenError {
    #[error("id space exhausted")]
    Exhausted,
    #[error("id backend error: {0}")]
    Backend(String),
}

/// Mints unique 64-bit identifiers for runs and interrupt events.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    async fn gen_id(&self) -> Result<i64, IdGenError>;
}

// --- Real implementation ---

/// Time-ordered ids: 41 bits of milliseconds, 10 bits of worker, 12 bits of sequence.
pub struct SnowflakeIdGenerator {
    worker: i64,
    state: Mutex<(i64, i64)>,
}

impl SnowflakeIdGenerator {
    pub fn new(worker: u16) -> Self {
        Self {
            worker: i64::from(worker.min(MAX_WORKER)),
            state: Mutex::new((0, 0)),
        }
    }
}

impl Default for SnowflakeIdGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl IdGenerator for SnowflakeIdGenerator {
    async fn gen_id(&self) -> Result<i64, IdGenError> {
        let now = chrono::Utc::now().timestamp_millis() - EPOCH_MILLIS;
        if now < 0 {
            return Err(IdGenError::Backend("system clock before id epoch".into()));
        }

        let mut state = self.state.lock();
        let (last, seq) = *state;
        // a clock that went backwards keeps using the last timestamp
        let (millis, seq) = if now > last {
            (now, 0)
        } else if seq < MAX_SEQUENCE {
            (last, seq + 1)
        } else {
            (last + 1, 0)
        };
        if millis >= 1 << 41 {
            return Err(IdGenError::Exhausted);
        }
        *state = (millis, seq);

        Ok((millis << (WORKER_BITS + SEQUENCE_BITS)) | (self.worker << SEQUENCE_BITS) | seq)
    }
}

// --- Fake implementation ---

/// Sequential ids starting at a fixed value, for tests and single-process tools.
pub struct FakeIdGenerator {
    next: AtomicI64,
}

impl FakeIdGenerator {
    pub fn new(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }

    /// Next id that will be handed out.
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdGenerator for FakeIdGenerator {
    async fn gen_id(&self) -> Result<i64, IdGenError> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
