pub mod extract;
pub mod layout;
pub mod merge;
pub(crate) mod util;

pub use extract::{extract_file, ExtractOptions, Extraction, FormatError, StatementExtractor};
pub use layout::{ColumnMapping, Field, Layout, LayoutKind};
pub use merge::{
    merge, merge_batches, signature_collisions, Admitted, MergeEngine, MergeOutcome, Signed,
};
