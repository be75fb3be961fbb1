//! Core module - metadata store access, log decoding and the track index

pub mod branch;
pub mod cache;
pub mod collection;
pub mod config;
pub mod field;
pub mod git;
pub mod lock;
pub mod metalog;
pub mod store;

pub use branch::{BranchDelta, BranchReader, BranchSnapshot};
pub use cache::{
    BuildMode, BuildStats, CacheError, CacheState, CacheStats, CachedTrack, TrackCache,
};
pub use collection::{Collection, CollectionError};
pub use config::Config;
pub use field::{Field, FieldKind};
pub use git::{Git, GitError};
pub use lock::IndexLock;
pub use metalog::{MetadataRecord, ResolvedMetadata};
pub use store::{AnnexStore, MemoryStore, MetadataStore, TrackLocation};
