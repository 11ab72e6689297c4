//! Validator-side miner accounting: score histories, windowed rate limits and weighted sampling
//! behind an Arc-per-miner registry with write-through persistence.

pub mod allocation;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod registry;
pub mod sampler;
pub mod score;
pub mod service;
pub mod state;
pub mod store;
pub mod traits;

pub use allocation::stake_weighted_capacities;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AllocationConfig, ConfigError, ManagingConfig, RateLimitConfig, StoreConfig};
pub use error::ManagingError;
pub use ratelimit::{ConsumeOutcome, RateLimitPolicy, RateLimitRecord};
pub use registry::MinerRegistry;
pub use sampler::{AbsoluteRemaining, HeadroomFraction, SampleMode, Sampler, WeightPolicy};
pub use score::{ScoreEntry, ScoreHistorySnapshot, ScoreRecord};
pub use service::ManagingService;
pub use state::{MinerRecords, MinerState, MinerView};
pub use store::{FileMinerStore, MemoryMinerStore, MinerSnapshot, MinerStore, MinerStoreError};
pub use traits::{Hotkey, MinerId};
