use chrono::NaiveDate;
use finsight_core::Amount;
use serde::{Deserialize, Serialize};

/// One row as the categorizer sees it. `id` is the row's position in the batch and only
/// lives for the duration of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: usize,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizationRequest {
    pub category_vocabulary: Vec<String>,
    pub rules: Vec<String>,
    pub batch: Vec<BatchItem>,
}

/// A single answer from the categorizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: usize,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub renamed_description: Option<String>,
    #[serde(default)]
    pub delete: bool,
}

/// A categorizer reply after validation. Anything that is not a well-formed list of
/// assignments is `Malformed`, carrying the parse failure for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorizationReply {
    Assignments(Vec<Assignment>),
    Malformed(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyShape {
    Bare(Vec<Assignment>),
    Wrapped { assignments: Vec<Assignment> },
}

impl CategorizationReply {
    /// Accepts a bare JSON array or an object with an `assignments` array, optionally wrapped
    /// in a Markdown code fence.
    pub fn parse(text: &str) -> Self {
        let body = strip_fence(text.trim());
        match serde_json::from_str::<ReplyShape>(body) {
            Ok(ReplyShape::Bare(assignments)) | Ok(ReplyShape::Wrapped { assignments }) => {
                CategorizationReply::Assignments(assignments)
            }
            Err(e) => CategorizationReply::Malformed(e.to_string()),
        }
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_keys() {
        let req = CategorizationRequest {
            category_vocabulary: vec!["Groceries".into()],
            rules: vec!["COSTCO is Groceries".into()],
            batch: vec![BatchItem {
                id: 0,
                date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                description: "COSTCO".into(),
                amount: Amount::from_cents(8412),
            }],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"categoryVocabulary\":[\"Groceries\"]"));
        assert!(json.contains("\"date\":\"2024-01-15\""));
        assert!(json.contains("\"amount\":\"84.12\""));
    }

    #[test]
    fn parses_bare_array() {
        let reply = CategorizationReply::parse(
            r#"[{"id":0,"category":"Dining","renamedDescription":"Joe's"},{"id":1,"delete":true}]"#,
        );
        let CategorizationReply::Assignments(list) = reply else {
            panic!("expected assignments");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].renamed_description.as_deref(), Some("Joe's"));
        assert!(list[1].delete);
        assert_eq!(list[1].category, None);
    }

    #[test]
    fn parses_wrapped_and_fenced() {
        let text = "```json\n{\"assignments\":[{\"id\":3,\"category\":\"Fees\"}]}\n```";
        assert_eq!(
            CategorizationReply::parse(text),
            CategorizationReply::Assignments(vec![Assignment {
                id: 3,
                category: Some("Fees".into()),
                renamed_description: None,
                delete: false,
            }])
        );
    }

    #[test]
    fn garbage_is_malformed() {
        for text in ["", "Sure! Here are your categories:", "{\"id\":1}", "[{\"category\":\"x\"}]"] {
            assert!(matches!(
                CategorizationReply::parse(text),
                CategorizationReply::Malformed(_)
            ));
        }
    }
}
