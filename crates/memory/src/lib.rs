pub mod document;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod redb_store;
pub mod reflections;
pub mod roadmap;
pub mod schema;
pub mod scorer;
pub mod session;
pub mod state;
pub mod store;

pub use document::{DocumentStore, InMemoryDocumentStore, Query};
pub use error::{MemoryError, MemoryResult, StoreError, StoreResult};
pub use identity::{IdentityCore, IdentityPatch, PatchMode};
pub use ledger::Ledger;
pub use redb_store::RedbDocumentStore;
pub use reflections::{Reflection, ReflectionLog};
pub use roadmap::{EvolutionRoadmap, ObjectiveStatus};
pub use schema::{ConsolidationTier, MemoryId, MemoryRecord, NewMemory, clamp_unit, truncate_str};
pub use scorer::{SurpriseCalculation, SurpriseFeatures, score};
pub use session::{SessionManager, SessionSnapshot, SessionSummary};
pub use state::{Checkpoint, ConsciousnessState, SessionContinuity};
pub use store::MemoryStore;
