//! Injectable effects for deterministic testing
//!
//! Time and randomness are the only side effects the protocol core depends
//! on. Both are injected behind small traits so that production uses the
//! system clock and OS entropy while tests run fully deterministic: same
//! seed and start time, same message ids, same shares, same transcripts.

use crate::{CoralError, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Abstract clock. Production reads system time; tests advance manually.
pub trait Clock: Send + Sync {
    /// Current Unix timestamp in seconds.
    fn now(&self) -> Result<u64>;

    /// Advance time by N seconds. No-op for real clocks.
    fn advance(&self, _seconds: u64) -> Result<()> {
        Ok(())
    }

    /// Whether this clock is simulated.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Real system clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| CoralError::internal(format!("system time before Unix epoch: {e}")))
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    current: Arc<Mutex<u64>>,
}

impl SimulatedClock {
    /// Start at the given Unix timestamp.
    pub fn new(initial: u64) -> Self {
        SimulatedClock {
            current: Arc::new(Mutex::new(initial)),
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Result<u64> {
        let now = self
            .current
            .lock()
            .map_err(|e| CoralError::internal(format!("clock lock poisoned: {e}")))?;
        Ok(*now)
    }

    fn advance(&self, seconds: u64) -> Result<()> {
        let mut now = self
            .current
            .lock()
            .map_err(|e| CoralError::internal(format!("clock lock poisoned: {e}")))?;
        *now = now.saturating_add(seconds);
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Abstract randomness source.
pub trait RandomSource: Send + Sync {
    /// Fill a byte buffer with random data.
    fn fill_bytes(&self, dest: &mut [u8]);

    /// Generate a UUID (v4 in production, seed-derived in tests).
    fn gen_uuid(&self) -> Uuid;
}

/// Cryptographically secure OS randomness.
#[derive(Debug, Clone, Default)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::thread_rng().fill_bytes(dest);
    }

    fn gen_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Seeded deterministic randomness. Same seed, same sequence.
#[derive(Debug, Clone)]
pub struct SeededRandomSource {
    rng: Arc<Mutex<StdRng>>,
}

impl SeededRandomSource {
    /// Create a seeded source.
    pub fn new(seed: u64) -> Self {
        SeededRandomSource {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) {
        // Mutex poisoning is unrecoverable in a test-only source
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        rng.fill_bytes(dest);
    }

    fn gen_uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.fill_bytes(&mut bytes);
        Uuid::from_bytes(bytes)
    }
}

/// Bundle of injected effects passed to engines and coordinators.
#[derive(Clone)]
pub struct Effects {
    /// Clock for timestamps and deadlines
    pub clock: Arc<dyn Clock>,
    /// Randomness for keys, IVs, share polynomials and message ids
    pub random: Arc<dyn RandomSource>,
}

impl Effects {
    /// Production effects: system clock and OS entropy.
    pub fn production() -> Self {
        Effects {
            clock: Arc::new(SystemClock),
            random: Arc::new(OsRandomSource),
        }
    }

    /// Deterministic effects: simulated clock and seeded randomness.
    pub fn deterministic(seed: u64, initial_time: u64) -> Self {
        Effects {
            clock: Arc::new(SimulatedClock::new(initial_time)),
            random: Arc::new(SeededRandomSource::new(seed)),
        }
    }

    /// Default test effects (seed 0, 2025-01-01 00:00:00 UTC).
    pub fn test() -> Self {
        Self::deterministic(0, 1735689600)
    }

    /// Current timestamp.
    pub fn now(&self) -> Result<u64> {
        self.clock.now()
    }

    /// Advance simulated time.
    pub fn advance(&self, seconds: u64) -> Result<()> {
        self.clock.advance(seconds)
    }

    /// Wait for `seconds` before continuing.
    ///
    /// Under a simulated clock this advances logical time instead of
    /// sleeping, so deferred work stays deterministic in tests.
    pub async fn delay(&self, seconds: u64) -> Result<()> {
        if self.clock.is_simulated() {
            self.clock.advance(seconds)
        } else {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            Ok(())
        }
    }

    /// Generate a fixed-size array of random bytes.
    pub fn random_bytes<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random.fill_bytes(&mut bytes);
        bytes
    }

    /// Generate a UUID.
    pub fn gen_uuid(&self) -> Uuid {
        self.random.gen_uuid()
    }
}

impl Default for Effects {
    fn default() -> Self {
        Self::production()
    }
}
