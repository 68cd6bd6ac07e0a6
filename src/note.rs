use serde::{Deserialize, Serialize};

use crate::securenotes::Invalid;
use crate::time::Timestamp;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_CONTENT_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "backend-sql", derive(sqlx::FromRow))]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A note as submitted by a client: no id to create, an existing id to edit.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NoteDraft {
    pub id: Option<String>,
    pub title: String,
    pub content: String,
}

impl NoteDraft {
    /// Trimmed title and content, if both are present and within limits.
    pub fn validate(&self) -> Result<(&str, &str), Invalid> {
        let title = self.title.trim();
        let content = self.content.trim();

        if title.is_empty() {
            return Err(Invalid::MissingTitle);
        }
        if content.is_empty() {
            return Err(Invalid::MissingContent);
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(Invalid::TitleTooLong);
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(Invalid::ContentTooLong);
        }

        Ok((title, content))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteListing {
    #[serde(flatten)]
    pub note: Note,
    pub updated_ago: String,
}

pub fn listings(notes: Vec<Note>, now: Timestamp) -> Vec<NoteListing> {
    notes
        .into_iter()
        .map(|note| NoteListing {
            updated_ago: note.updated_at.relative_to(now),
            note,
        })
        .collect()
}

/// Case-insensitive substring match on title or content. `term` must
/// already be lowercase.
pub fn matches(note: &Note, term: &str) -> bool {
    note.title.to_lowercase().contains(term) || note.content.to_lowercase().contains(term)
}

#[cfg(test)]
mod test {
    use super::*;

    fn draft(title: &str, content: &str) -> NoteDraft {
        NoteDraft {
            id: None,
            title: title.into(),
            content: content.into(),
        }
    }

    #[test]
    fn title_limit() {
        let content = "body";
        assert!(draft(&"t".repeat(100), content).validate().is_ok());
        assert_eq!(
            draft(&"t".repeat(101), content).validate(),
            Err(Invalid::TitleTooLong)
        );
    }

    #[test]
    fn limits_count_characters() {
        // 100 two-byte characters
        assert!(draft(&"é".repeat(100), "body").validate().is_ok());
        assert!(draft("t", &"ü".repeat(1000)).validate().is_ok());
        assert_eq!(
            draft("t", &"c".repeat(1001)).validate(),
            Err(Invalid::ContentTooLong)
        );
    }

    #[test]
    fn blank_fields() {
        assert_eq!(draft("  ", "body").validate(), Err(Invalid::MissingTitle));
        assert_eq!(draft("title", "\n").validate(), Err(Invalid::MissingContent));
        assert_eq!(
            draft("  Shopping ", " milk, eggs ").validate(),
            Ok(("Shopping", "milk, eggs"))
        );
    }

    #[test]
    fn listing_json() {
        let note = Note {
            id: "n1".into(),
            user_id: "u1".into(),
            title: "Shopping".into(),
            content: "milk, eggs".into(),
            created_at: Timestamp::from_millis(1_000),
            updated_at: Timestamp::from_millis(2_000),
        };

        let [listing] = &listings(vec![note], Timestamp::from_millis(2_000))[..] else {
            panic!("expected single listing")
        };
        let json = serde_json::to_value(listing).unwrap();

        assert_eq!(json["userId"], "u1");
        assert_eq!(json["updatedAt"], 2_000);
        assert_eq!(json["updatedAgo"], "Just now");
    }

    #[test]
    fn search_matches_title_or_content() {
        let note = Note {
            id: "n1".into(),
            user_id: "u1".into(),
            title: "Shopping".into(),
            content: "Milk, eggs".into(),
            created_at: Timestamp::default(),
            updated_at: Timestamp::default(),
        };

        assert!(matches(&note, "shop"));
        assert!(matches(&note, "milk"));
        assert!(!matches(&note, "bread"));
    }
}
