pub mod categories;
pub mod hash;
pub mod ledger_csv;
pub mod overrides;
pub mod rules;
pub mod store;

pub use categories::{CategoryError, CategoryStore, CATEGORIES_KEY};
pub use hash::{sha256_bytes, to_hex, Version};
pub use ledger_csv::{decode_ledger, encode_gold, encode_silver, GOLD_HEADER, SILVER_HEADER};
pub use overrides::{OverrideStore, OVERRIDES_KEY};
pub use rules::{RuleError, RuleStore, RULES_KEY};
pub use store::{Expect, FsStore, MemoryStore, Store, StoreError, Versioned, DEFAULT_IO_TIMEOUT};
