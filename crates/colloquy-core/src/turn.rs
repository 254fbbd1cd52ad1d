use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Hex SHA-256 digest over a turn's role and content.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Content Addresser: deterministic in `(role, content)` and nothing else.
    pub fn compute(role: Role, content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(role.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Written by the engine on synopsis turns. Callers cannot set it; it is
/// kept under its own key so caller metadata never collides with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynopsisMarker {
    /// How many active turns this synopsis replaced.
    pub compacted_turns: u32,
    /// Turns were archived without a summary.
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
}

/// Provenance attached by callers. Recognized flags are typed fields;
/// anything else goes in `extra`, which is stored as its own object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Web search results were consulted while producing this turn.
    #[serde(default, skip_serializing_if = "is_false")]
    pub web_search: bool,
    /// Document search results were consulted while producing this turn.
    #[serde(default, skip_serializing_if = "is_false")]
    pub document_search: bool,
    /// Model that produced an assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "_synopsis", default, skip_serializing_if = "Option::is_none")]
    synopsis: Option<SynopsisMarker>,
}

impl TurnMetadata {
    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    pub fn with_document_search(mut self) -> Self {
        self.document_search = true;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn synopsis(&self) -> Option<&SynopsisMarker> {
        self.synopsis.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub content_hash: ContentHash,
    #[serde(default)]
    pub metadata: TurnMetadata,
}

impl Turn {
    /// Build a caller turn stamped with the current time and its content hash.
    /// Any synopsis marker carried over in `metadata` is dropped.
    pub fn new(role: Role, content: impl Into<String>, mut metadata: TurnMetadata) -> Self {
        metadata.synopsis = None;
        Self::at(role, content, metadata, Utc::now())
    }

    /// Rebuild a stored turn as-is.
    pub fn at(
        role: Role,
        content: impl Into<String>,
        metadata: TurnMetadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            content_hash: ContentHash::compute(role, &content),
            role,
            content,
            timestamp,
            metadata,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, TurnMetadata::default())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, TurnMetadata::default())
    }

    /// A synthetic system turn standing in for `compacted` earlier turns.
    pub fn synopsis(text: impl Into<String>, compacted: u32) -> Self {
        Self::synopsis_from(
            text,
            SynopsisMarker {
                compacted_turns: compacted,
                truncated: false,
            },
        )
    }

    pub fn synopsis_from(text: impl Into<String>, marker: SynopsisMarker) -> Self {
        let metadata = TurnMetadata {
            synopsis: Some(marker),
            ..TurnMetadata::default()
        };
        Self::at(Role::System, text, metadata, Utc::now())
    }

    pub fn synopsis_marker(&self) -> Option<&SynopsisMarker> {
        self.metadata.synopsis().filter(|_| self.role == Role::System)
    }

    pub fn is_synopsis(&self) -> bool {
        self.synopsis_marker().is_some()
    }

    /// True when the stored hash still matches role + content.
    pub fn hash_is_valid(&self) -> bool {
        self.content_hash == ContentHash::compute(self.role, &self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = ContentHash::compute(Role::User, "My name is Sam");
        let b = ContentHash::compute(Role::User, "My name is Sam");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn hash_depends_on_role() {
        let user = ContentHash::compute(Role::User, "hello");
        let assistant = ContentHash::compute(Role::Assistant, "hello");
        assert_ne!(user, assistant);
    }

    #[test]
    fn hash_depends_on_content() {
        let a = ContentHash::compute(Role::User, "What's my name?");
        let b = ContentHash::compute(Role::User, "What's my name? ");
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_turns_share_hash_but_not_identity() {
        let a = Turn::user("ping");
        let b = Turn::user("ping");
        assert_eq!(a.content_hash, b.content_hash);
        assert!(a.hash_is_valid());
    }

    #[test]
    fn synopsis_marker() {
        let s = Turn::synopsis("summary of earlier turns", 4);
        assert!(s.is_synopsis());
        assert_eq!(s.role, Role::System);
        assert_eq!(s.synopsis_marker().map(|m| m.compacted_turns), Some(4));

        let plain_system = Turn::new(Role::System, "be brief", TurnMetadata::default());
        assert!(!plain_system.is_synopsis());
    }

    #[test]
    fn caller_turns_cannot_carry_a_synopsis_marker() {
        let copied = Turn::synopsis("s", 3).metadata;
        let turn = Turn::new(Role::System, "be brief", copied);
        assert!(!turn.is_synopsis());
        assert!(turn.metadata.synopsis().is_none());
    }

    #[test]
    fn extra_keys_never_shadow_engine_fields() {
        let meta = TurnMetadata::default()
            .with_extra("compacted_turns", serde_json::json!(2))
            .with_extra("_synopsis", serde_json::json!({"compacted_turns": 2}))
            .with_extra("model", serde_json::json!("spoofed"));
        let turn = Turn::new(Role::System, "be terse", meta);

        let json = serde_json::to_string(&turn).unwrap();
        let parsed: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, turn);
        assert!(!parsed.is_synopsis());
        assert!(parsed.metadata.model.is_none());
    }

    #[test]
    fn synopsis_marker_survives_serde() {
        let marker = SynopsisMarker {
            compacted_turns: 5,
            truncated: true,
        };
        let turn = Turn::synopsis_from("[5 earlier turns archived]", marker.clone());
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["metadata"]["_synopsis"]["truncated"], true);

        let parsed: Turn = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.synopsis_marker(), Some(&marker));
    }

    #[test]
    fn metadata_json_shape() {
        let meta = TurnMetadata::default()
            .with_web_search()
            .with_model("gpt-4o-mini")
            .with_extra("channel", serde_json::json!("general"));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["web_search"], true);
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["extra"]["channel"], "general");
        assert!(json.get("document_search").is_none());
        assert!(json.get("_synopsis").is_none());

        let parsed: TurnMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn unknown_top_level_metadata_is_ignored() {
        let parsed: TurnMetadata = serde_json::from_str(
            r#"{"document_search":true,"compacted_turns":2,"extra":{"rag_doc_ids":[1,2]}}"#,
        )
        .unwrap();
        assert!(parsed.document_search);
        assert!(parsed.synopsis().is_none());
        assert_eq!(parsed.extra["rag_doc_ids"], serde_json::json!([1, 2]));
    }

    #[test]
    fn role_parse_and_display() {
        for role in [Role::User, Role::Assistant, Role::System] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn turn_json_preserves_timestamp_precision() {
        let turn = Turn::assistant("Nice to meet you, Sam");
        let json = serde_json::to_string(&turn).unwrap();
        let parsed: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, turn);
    }
}
