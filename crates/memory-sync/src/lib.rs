// memory-sync/src/lib.rs

pub mod config;
pub mod crypto;
pub mod error;
pub mod library;
pub mod model;
pub mod orchestrator;
pub mod signals;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod transfer;
pub mod transport;
pub mod wakeup;

// Public API exports
pub use config::SyncConfig;
pub use crypto::FieldCipher;
pub use error::{DecryptionError, TransportError, TransportResult};
pub use library::{FallbackLibrary, MediaLibrary};
pub use model::{Image, Memory, MemoryItem, MemorySettings, Tombstone, TombstoneKind};
pub use orchestrator::{ReconcileOutcome, ReconcilePlan, SyncOrchestrator};
pub use signals::{EventBus, SyncEvent};
pub use store::{InMemoryStore, LocalStore, SqliteStore};
pub use tracker::{InFlightTracker, TransferGuard};
pub use transfer::{RemoteImageIds, RemoteSettings, TransferImage, TransferMemory, TransferSong};
pub use transport::{Credentials, HttpRemoteApi, Operation, RemoteApi};
pub use wakeup::{ActionCode, EchoLock, WakeupHandler, WakeupOutcome, WakeupPayload};
