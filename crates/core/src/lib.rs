pub mod category;
pub mod money;
pub mod overrides;
pub mod rule;
pub mod signature;
pub mod statement;
pub mod transaction;

pub use category::{is_delete_sentinel, Vocabulary, DEFAULT_CATEGORIES, DELETE_SENTINEL, UNCATEGORIZED};
pub use money::{Amount, AmountError};
pub use overrides::{
    parse_field_changes, FieldChanges, OverrideError, OverrideField, OverrideKey, OverrideSet,
};
pub use rule::{Applicability, Rule, RuleId};
pub use signature::{ContentSignature, SignatureError, DATE_FORMAT, LEGACY_DATE_FORMAT};
pub use statement::{Direction, StatementClass};
pub use transaction::{CanonicalRecord, Transaction, TransactionId};
