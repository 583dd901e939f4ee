//! Option chain resolution and the on-disk chain cache

pub mod resolver;
pub mod store;
pub mod types;

pub use resolver::ChainResolver;
pub use store::ChainStore;
pub use types::{ChainMap, ChainResolution, OptionChain, ResolvedOption};
