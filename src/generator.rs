use std::fmt;
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::clock::{SystemClock, TimeSource};
use crate::uid::{self, Uid, MAX_SEQUENCE, NODE_ID_BITS};

/// Construction-time failures. Generation itself never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    InvalidNodeId(u64),
    EpochInFuture { epoch_ms: u64, now_ms: u64 },
    MissingConfig,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNodeId(node_id) => {
                write!(
                    f,
                    "Node ID {} out of range, must be between 0 and 2^{} - 1",
                    node_id, NODE_ID_BITS
                )
            }
            Self::EpochInFuture { epoch_ms, now_ms } => {
                write!(
                    f,
                    "Epoch {} is in the future compared to the current timestamp {}",
                    epoch_ms, now_ms
                )
            }
            Self::MissingConfig => write!(f, "Config must be provided"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Configuration for a [`UidGenerator`]. Pure value, validated on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    epoch_ms: u64,
    node_id: u32,
    constant_random: Option<u16>,
}

impl GeneratorConfig {
    /// Create a config. `node_id` must fit the 32-bit node field.
    pub fn new(
        epoch_ms: u64,
        node_id: u64,
        constant_random: Option<u16>,
    ) -> Result<Self, BuildError> {
        if node_id >= (1u64 << NODE_ID_BITS) {
            return Err(BuildError::InvalidNodeId(node_id));
        }
        Ok(Self {
            epoch_ms,
            node_id: node_id as u32,
            constant_random,
        })
    }

    pub fn epoch_ms(&self) -> u64 {
        self.epoch_ms
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn constant_random(&self) -> Option<u16> {
        self.constant_random
    }
}

/// How the random discriminator of each id is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomMode {
    /// Use the config's constant value for every id (0 if none was configured).
    Constant,
    /// Fresh draw from the thread-local CSPRNG for every id.
    PerId,
}

#[derive(Debug, Clone, Copy)]
enum RandomSource {
    Constant(u16),
    PerId,
}

/// Reconciler state. Both fields commit together under one lock; no caller
/// ever observes one advanced without the other.
struct ReconcilerState {
    /// Last timestamp an id was issued for. 0 is the pre-first-call sentinel,
    /// below any real clock reading. Never decreases.
    last_timestamp: u64,
    sequence: u32,
}

/// A generator for 128-bit time-ordered unique IDs: timestamp delta, node ID,
/// per-millisecond sequence, and a random discriminator. See [`crate::uid`]
/// for the bit layout.
///
/// Safe to share across threads; `generate` takes `&self`.
pub struct UidGenerator {
    epoch_ms: u64,
    node_id: u32,
    random: RandomSource,
    time_source: Arc<dyn TimeSource>,
    state: Mutex<ReconcilerState>,
}

// Manual impl: the time source trait object is not Debug
impl fmt::Debug for UidGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UidGenerator")
            .field("epoch_ms", &self.epoch_ms)
            .field("node_id", &self.node_id)
            .field("random", &self.random)
            .finish_non_exhaustive()
    }
}

impl UidGenerator {
    pub fn builder() -> UidGeneratorBuilder {
        UidGeneratorBuilder {
            config: None,
            time_source: None,
            random_mode: None,
        }
    }

    /// Generate a new unique ID.
    ///
    /// Never fails. A backwards clock or an exhausted per-millisecond
    /// sequence is recovered internally (logged at warn level); the only
    /// blocking path is the spin for the next millisecond on exhaustion,
    /// bounded by the time source advancing.
    pub fn generate(&self) -> Uid {
        // The draw does not depend on reconciler state, keep it outside the lock
        let random = match self.random {
            RandomSource::Constant(v) => v,
            RandomSource::PerId => rand::rng().random::<u16>(),
        };

        let (timestamp, sequence) = self.reconcile();

        // Saturate: a clock regressing below the epoch before the first id
        // would otherwise underflow the delta
        uid::from_parts(
            timestamp.saturating_sub(self.epoch_ms),
            self.node_id,
            sequence,
            random,
        )
    }

    /// Advance `(last_timestamp, sequence)` by one issued id and return the
    /// pair to stamp. This is the sole critical section of the generator.
    fn reconcile(&self) -> (u64, u16) {
        let mut state = self.state.lock().unwrap();

        let now = self.time_source.now_ms();
        let mut observed = now;

        // Clock moved backwards: bump one past the last issued millisecond
        // instead of re-issuing a past timestamp.
        if observed < state.last_timestamp {
            observed = state.last_timestamp + 1;
            log::warn!(
                "[UID_GEN] Clock moved backwards on node {}. Adjusting timestamp from {} to {}.",
                self.node_id,
                now,
                observed
            );
        }

        if observed == state.last_timestamp {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                // Per-millisecond space exhausted: spin until the clock ticks
                log::warn!(
                    "[UID_GEN] Sequence exhausted at {} on node {}, waiting for next millisecond",
                    observed,
                    self.node_id
                );
                observed = self.wait_for_next_ms(state.last_timestamp);
                state.sequence = 0;
            }
        } else {
            // Fresh millisecond (real or bumped)
            state.sequence = 0;
        }

        state.last_timestamp = observed;
        (observed, state.sequence as u16)
    }

    /// Spin-read the time source until it strictly exceeds `last`. The wait
    /// is expected to be sub-millisecond.
    fn wait_for_next_ms(&self, last: u64) -> u64 {
        let mut now = self.time_source.now_ms();
        while now <= last {
            std::hint::spin_loop();
            now = self.time_source.now_ms();
        }
        now
    }
}

/// Builder for [`UidGenerator`].
pub struct UidGeneratorBuilder {
    config: Option<GeneratorConfig>,
    time_source: Option<Arc<dyn TimeSource>>,
    random_mode: Option<RandomMode>,
}

impl UidGeneratorBuilder {
    pub fn config(mut self, config: GeneratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Time source to read; defaults to [`SystemClock`]. Pass a
    /// [`crate::clock::CachedClockReader`] to use cached time.
    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Defaults to [`RandomMode::Constant`] when the config carries a
    /// constant random value, [`RandomMode::PerId`] otherwise.
    pub fn random_mode(mut self, random_mode: RandomMode) -> Self {
        self.random_mode = Some(random_mode);
        self
    }

    pub fn build(self) -> Result<UidGenerator, BuildError> {
        let config = self.config.ok_or(BuildError::MissingConfig)?;
        let time_source = self
            .time_source
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn TimeSource>);

        // An id's timestamp component must never represent negative elapsed time
        let now_ms = time_source.now_ms();
        if config.epoch_ms > now_ms {
            log::error!(
                "[UID_GEN] Invalid configuration: epoch ({}) is in the future compared to the current timestamp ({}).",
                config.epoch_ms,
                now_ms
            );
            return Err(BuildError::EpochInFuture {
                epoch_ms: config.epoch_ms,
                now_ms,
            });
        }

        let mode = self.random_mode.unwrap_or(match config.constant_random {
            Some(_) => RandomMode::Constant,
            None => RandomMode::PerId,
        });
        let random = match mode {
            RandomMode::Constant => RandomSource::Constant(config.constant_random.unwrap_or(0)),
            RandomMode::PerId => RandomSource::PerId,
        };

        log::info!(
            "[UID_GEN] Initialized with epoch: {}, node_id: {}",
            config.epoch_ms,
            config.node_id
        );

        Ok(UidGenerator {
            epoch_ms: config.epoch_ms,
            node_id: config.node_id,
            random,
            time_source,
            state: Mutex::new(ReconcilerState {
                last_timestamp: 0,
                sequence: 0,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    const EPOCH: u64 = 1_672_531_200_000;

    fn generator_at(clock: Arc<ManualClock>, constant_random: Option<u16>) -> UidGenerator {
        let config = GeneratorConfig::new(EPOCH, 1, constant_random).unwrap();
        UidGenerator::builder()
            .config(config)
            .time_source(clock)
            .build()
            .unwrap()
    }

    #[test]
    fn test_invalid_node_id() {
        let err = GeneratorConfig::new(EPOCH, 1 << 32, None).unwrap_err();
        assert_eq!(err, BuildError::InvalidNodeId(1 << 32));

        // Largest valid id
        assert!(GeneratorConfig::new(EPOCH, (1 << 32) - 1, None).is_ok());
    }

    #[test]
    fn test_epoch_in_future() {
        let clock = Arc::new(ManualClock::new(EPOCH - 1));
        let config = GeneratorConfig::new(EPOCH, 1, None).unwrap();
        let err = UidGenerator::builder()
            .config(config)
            .time_source(clock)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::EpochInFuture {
                epoch_ms: EPOCH,
                now_ms: EPOCH - 1
            }
        );
    }

    #[test]
    fn test_missing_config() {
        let err = UidGenerator::builder().build().unwrap_err();
        assert_eq!(err, BuildError::MissingConfig);
    }

    #[test]
    fn test_generator_debug_format() {
        // unwrap_err on Result<UidGenerator, _> needs this impl
        let clock = Arc::new(ManualClock::new(EPOCH + 1));
        let generator = generator_at(clock, Some(42));
        let rendered = format!("{:?}", generator);
        assert!(rendered.contains("UidGenerator"));
        assert!(rendered.contains(&EPOCH.to_string()));
    }

    #[test]
    fn test_concrete_scenario() {
        // Clock fixed at epoch + 5000 ms, node 1, constant random 42
        let clock = Arc::new(ManualClock::new(EPOCH + 5000));
        let generator = generator_at(clock, Some(42));

        let first = generator.generate();
        assert_eq!(uid::timestamp_delta(first), 5000);
        assert_eq!(uid::node_id(first), 1);
        assert_eq!(uid::sequence(first), 0);
        assert_eq!(uid::random_part(first), 42);

        // Same simulated millisecond: only the sequence differs
        let second = generator.generate();
        assert_eq!(uid::timestamp_delta(second), 5000);
        assert_eq!(uid::node_id(second), 1);
        assert_eq!(uid::sequence(second), 1);
        assert_eq!(uid::random_part(second), 42);
    }

    #[test]
    fn test_new_millisecond_resets_sequence() {
        let clock = Arc::new(ManualClock::new(EPOCH + 100));
        let generator = generator_at(clock.clone(), Some(0));

        generator.generate();
        let same_ms = generator.generate();
        assert_eq!(uid::sequence(same_ms), 1);

        clock.advance(1);
        let next_ms = generator.generate();
        assert_eq!(uid::timestamp_delta(next_ms), 101);
        assert_eq!(uid::sequence(next_ms), 0);
    }

    #[test]
    fn test_clock_regression_keeps_timestamps_advancing() {
        let clock = Arc::new(ManualClock::new(EPOCH + 100));
        let generator = generator_at(clock.clone(), Some(0));

        let before = generator.generate();
        assert_eq!(uid::timestamp_delta(before), 100);

        // Wall clock jumps backwards; the issued timestamp must still advance
        clock.set(EPOCH + 40);
        let after = generator.generate();
        assert_eq!(uid::timestamp_delta(after), 101);
        assert_eq!(uid::sequence(after), 0);
        assert!(after > before);
    }

    #[test]
    fn test_constant_random_fidelity() {
        let clock = Arc::new(ManualClock::new(EPOCH + 10));
        let generator = generator_at(clock, Some(0x7AB3));

        for _ in 0..100 {
            assert_eq!(uid::random_part(generator.generate()), 0x7AB3);
        }
    }

    #[test]
    fn test_per_id_random_in_range() {
        let clock = Arc::new(ManualClock::new(EPOCH + 10));
        let config = GeneratorConfig::new(EPOCH, 1, None).unwrap();
        let generator = UidGenerator::builder()
            .config(config)
            .time_source(clock)
            .random_mode(RandomMode::PerId)
            .build()
            .unwrap();

        // Bound is enforced by the field width; check the sequence still
        // disambiguates ids within the fixed millisecond
        let mut seen = HashSet::new();
        for expected_seq in 0..1000u16 {
            let id = generator.generate();
            assert_eq!(uid::sequence(id), expected_seq);
            assert!(seen.insert(id), "Duplicate ID generated: {}", id);
        }
    }

    /// Clock that returns the same millisecond for `reads_per_ms` reads, then
    /// moves on. Lets the exhaustion spin terminate deterministically.
    struct AutoAdvanceClock {
        start: u64,
        reads: AtomicU64,
        reads_per_ms: u64,
    }

    impl TimeSource for AutoAdvanceClock {
        fn now_ms(&self) -> u64 {
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            self.start + read / self.reads_per_ms
        }
    }

    #[test]
    fn test_sequence_exhaustion_rolls_into_next_millisecond() {
        let clock = Arc::new(AutoAdvanceClock {
            start: EPOCH + 1,
            reads: AtomicU64::new(0),
            reads_per_ms: 70_000,
        });
        let config = GeneratorConfig::new(EPOCH, 1, Some(0)).unwrap();
        let generator = UidGenerator::builder()
            .config(config)
            .time_source(clock)
            .build()
            .unwrap();

        // Drain the full sequence space of one millisecond
        let mut last = generator.generate();
        assert_eq!(uid::sequence(last), 0);
        for expected_seq in 1..=MAX_SEQUENCE as u16 {
            let id = generator.generate();
            assert_eq!(uid::timestamp_delta(id), 1);
            assert_eq!(uid::sequence(id), expected_seq);
            assert!(id > last);
            last = id;
        }

        // One more call must roll into the next millisecond with sequence 0
        let rolled = generator.generate();
        assert_eq!(uid::timestamp_delta(rolled), 2);
        assert_eq!(uid::sequence(rolled), 0);
        assert!(rolled > last);
    }

    #[test]
    fn test_sequential_uniqueness_system_clock() {
        let config = GeneratorConfig::new(EPOCH, 7, None).unwrap();
        let generator = UidGenerator::builder().config(config).build().unwrap();

        let mut set = HashSet::new();
        let mut last_ts = 0u64;
        for _ in 0..10_000 {
            let id = generator.generate();
            assert!(set.insert(id), "Duplicate ID generated: {}", id);
            assert_eq!(uid::node_id(id), 7);

            // Timestamps never go backwards
            let ts = uid::timestamp_delta(id);
            assert!(ts >= last_ts);
            last_ts = ts;
        }
    }
}
