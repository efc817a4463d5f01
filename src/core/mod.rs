pub mod cache;
pub mod comparator;
pub mod engine;
pub mod remote;
pub mod scanner;
pub mod spec;
pub mod verifier;

pub use cache::DownloadCache;
pub use comparator::{CompareConfig, ComparePolicy, DifferenceReport, FileComparator, FileRelation};
pub use engine::{
    FileOutcome, Operation, OutcomeStatus, Phase, PlannedAction, ReconcileReport, SyncConfig,
    SyncEngine,
};
pub use remote::{ListingMode, RemoteScanner, RemoteSegment, RemoteSpec};
pub use scanner::{LocalScanner, TimestampZone};
pub use spec::{read_spec_file, resolve_flat, resolve_tree, SpecEntry, SpecSyntax};
pub use verifier::{calculate_hash, ContentVerifier, DigestVerifier};
