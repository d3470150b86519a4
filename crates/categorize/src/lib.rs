pub mod backend;
pub mod transformer;
pub mod wire;

pub use backend::{
    CategorizationError, Categorizer, HttpCategorizer, StaticCategorizer, UnavailableCategorizer,
};
pub use transformer::{
    applicable_rules, CategorizationTransformer, Categorized, DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT,
};
pub use wire::{Assignment, BatchItem, CategorizationReply, CategorizationRequest};
