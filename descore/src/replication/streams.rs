use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A named, reproducible random number generator owned by a replication.
///
/// A stream is identified by a seed and a stream index: the generator is a
/// ChaCha8 generator seeded with the seed and positioned on the stream whose
/// index is the index of the replication within its experiment, so that the
/// replications of an experiment draw statistically independent numbers from
/// a single seed.
///
/// `RandomStream` is a handle: clones share the same generator.
///
/// # Examples
///
/// ```
/// use rand::Rng;
///
/// use descore::replication::RandomStream;
///
/// let mut a = RandomStream::new("arrivals", 42, 0);
/// let mut b = RandomStream::new("arrivals", 42, 0);
/// let mut c = RandomStream::new("arrivals", 42, 1);
///
/// let x: u64 = a.gen();
/// assert_eq!(x, b.gen::<u64>());
/// assert_ne!(x, c.gen::<u64>());
///
/// a.reset();
/// assert_eq!(x, a.gen::<u64>());
/// ```
#[derive(Clone)]
pub struct RandomStream {
    name: Arc<str>,
    seed: u64,
    stream_index: u64,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl RandomStream {
    /// Creates a stream with the specified seed and stream index.
    pub fn new(name: impl Into<String>, seed: u64, stream_index: u64) -> Self {
        let name: String = name.into();

        Self {
            name: name.into(),
            seed,
            stream_index,
            rng: Arc::new(Mutex::new(Self::generator(seed, stream_index))),
        }
    }

    /// Returns the name of the stream.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the seed of the stream.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the stream index.
    pub fn stream_index(&self) -> u64 {
        self.stream_index
    }

    /// Rewinds the stream to its first number.
    pub fn reset(&self) {
        *self.lock() = Self::generator(self.seed, self.stream_index);
    }

    fn generator(seed: u64, stream_index: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream_index);

        rng
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChaCha8Rng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RngCore for RandomStream {
    fn next_u32(&mut self) -> u32 {
        self.lock().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.lock().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.lock().fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.lock().try_fill_bytes(dest)
    }
}

impl fmt::Debug for RandomStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomStream")
            .field("name", &self.name)
            .field("seed", &self.seed)
            .field("stream_index", &self.stream_index)
            .finish_non_exhaustive()
    }
}
