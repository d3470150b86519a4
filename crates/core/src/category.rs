/// Category of any row the categorizer could not (or did not) place.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Category a categorizer assigns to rows that a rule says must be removed from the ledger.
pub const DELETE_SENTINEL: &str = "Delete";

pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Groceries",
    "Dining",
    "Coffee",
    "Transportation",
    "Gas",
    "Shopping",
    "Entertainment",
    "Subscriptions",
    "Utilities",
    "Phone & Internet",
    "Rent",
    "Insurance",
    "Health",
    "Personal Care",
    "Travel",
    "Education",
    "Gifts & Donations",
    "Fees",
    "Income",
    "E-Transfer",
    "Investments",
    UNCATEGORIZED,
];

/// A fixed category vocabulary. Lookups are case-insensitive and return the vocabulary's own
/// spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    categories: Vec<String>,
}

impl Vocabulary {
    /// Builds a vocabulary, dropping blanks and case-insensitive repeats. `Uncategorized` is
    /// always present.
    pub fn new<S: AsRef<str>>(categories: impl IntoIterator<Item = S>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for c in categories {
            let c = c.as_ref().trim();
            if c.is_empty() || out.iter().any(|e| e.eq_ignore_ascii_case(c)) {
                continue;
            }
            out.push(c.to_string());
        }
        if !out.iter().any(|e| e.eq_ignore_ascii_case(UNCATEGORIZED)) {
            out.push(UNCATEGORIZED.to_string());
        }
        Vocabulary { categories: out }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn lookup(&self, candidate: &str) -> Option<&str> {
        let candidate = candidate.trim();
        self.categories
            .iter()
            .find(|c| c.eq_ignore_ascii_case(candidate))
            .map(String::as_str)
    }

    /// Maps a categorizer answer onto the vocabulary: unknown answers become `Uncategorized`.
    pub fn resolve(&self, candidate: &str) -> &str {
        self.lookup(candidate).unwrap_or(UNCATEGORIZED)
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary::new(DEFAULT_CATEGORIES.iter().copied())
    }
}

pub fn is_delete_sentinel(category: &str) -> bool {
    category.trim().eq_ignore_ascii_case(DELETE_SENTINEL)
}
