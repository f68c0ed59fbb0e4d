use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

use super::token_policy::{select_token, TokenCandidate};
use crate::domain::authentication::{NsfwStatus, UserAuthRecord};

// ============================================================================
// Legacy Authentication Formats
// ============================================================================
//
// (a) flat:   auth_tokens.json    { userId: { token, createdAt?, expiresAt? } }
//             nsfw_verified.json  { userId: { verified, verifiedAt? } | bool }
// (b) nested: auth.json           { userAuth: { userId: {...} },
//                                   tokens: { key: { userId, value, ... } } }
//
// Older writers stored timestamps as epoch milliseconds, newer ones as
// RFC 3339 strings; both are accepted.
//
// ============================================================================

pub const FLAT_FORMAT: &str = "flat";
pub const NESTED_FORMAT: &str = "nested";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDocumentFormat {
    Current,
    Nested,
}

/// Classify raw auth.json content. Anything that is not recognisably the
/// nested shape is treated as current and left to the normal decoder.
pub fn detect_format(bytes: &[u8]) -> AuthDocumentFormat {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) if !map.contains_key("users") => {
            if map.contains_key("userAuth") || map.contains_key("tokens") {
                AuthDocumentFormat::Nested
            } else {
                AuthDocumentFormat::Current
            }
        }
        _ => AuthDocumentFormat::Current,
    }
}

// ============================================================================
// Legacy Shapes
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTokenEntry {
    pub token: String,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyVerification {
    Flag(bool),
    Status {
        #[serde(default)]
        verified: bool,
        #[serde(default, rename = "verifiedAt", deserialize_with = "timestamp")]
        verified_at: Option<DateTime<Utc>>,
    },
}

impl LegacyVerification {
    fn into_status(self) -> NsfwStatus {
        match self {
            LegacyVerification::Flag(verified) => NsfwStatus { verified, verified_at: None },
            LegacyVerification::Status { verified, verified_at } => NsfwStatus {
                verified,
                verified_at: verified_at.filter(|_| verified),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyNestedDocument {
    #[serde(default)]
    pub user_auth: BTreeMap<String, LegacyUserAuth>,
    #[serde(default)]
    pub tokens: BTreeMap<String, LegacyNestedToken>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUserAuth {
    #[serde(default)]
    pub nsfw_status: Option<LegacyVerification>,
    #[serde(default)]
    pub token: Option<LegacyNestedToken>,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyNestedToken {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
}

impl LegacyNestedToken {
    fn candidate(&self) -> TokenCandidate {
        TokenCandidate {
            value: self.value.clone(),
            created_at: self.created_at,
            saved_at: self.saved_at,
            expires_at: self.expires_at,
            revoked: self.revoked,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(DateTime<Utc>),
}

fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawTimestamp>::deserialize(deserializer)? {
        None => None,
        Some(RawTimestamp::Text(at)) => Some(at),
        Some(RawTimestamp::Millis(millis)) => Utc.timestamp_millis_opt(millis).single(),
    })
}

// ============================================================================
// Transforms
// ============================================================================

fn record(user_id: &str, token: Option<TokenCandidate>, nsfw_status: NsfwStatus, now: DateTime<Utc>) -> UserAuthRecord {
    let token = token.map(TokenCandidate::into_token);
    UserAuthRecord {
        user_id: user_id.to_string(),
        created_at: Some(token.as_ref().and_then(|t| t.created_at).unwrap_or(now)),
        updated_at: Some(now),
        token,
        nsfw_status,
        version: 0,
    }
}

/// Format (a): one record per user found in either file
pub fn migrate_flat(
    tokens: BTreeMap<String, LegacyTokenEntry>,
    verifications: BTreeMap<String, LegacyVerification>,
    now: DateTime<Utc>,
) -> BTreeMap<String, UserAuthRecord> {
    let mut tokens = tokens;
    let mut verifications = verifications;

    let users: Vec<String> = tokens.keys().chain(verifications.keys()).cloned().collect();
    let mut records = BTreeMap::new();

    for user_id in users {
        if records.contains_key(&user_id) {
            continue;
        }

        let candidate = tokens.remove(&user_id).map(|entry| TokenCandidate {
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            ..TokenCandidate::new(entry.token)
        });
        let token = select_token(candidate, now);
        let nsfw_status = verifications
            .remove(&user_id)
            .map(LegacyVerification::into_status)
            .unwrap_or_default();

        records.insert(user_id.clone(), record(&user_id, token, nsfw_status, now));
    }

    records
}

/// Format (b): collapse every token a user ever had down to one
pub fn migrate_nested(document: LegacyNestedDocument, now: DateTime<Utc>) -> BTreeMap<String, UserAuthRecord> {
    let mut candidates: BTreeMap<String, Vec<TokenCandidate>> = BTreeMap::new();

    for (user_id, auth) in &document.user_auth {
        let entry = candidates.entry(user_id.clone()).or_default();
        if let Some(token) = &auth.token {
            entry.push(token.candidate());
        }
    }

    for (key, token) in &document.tokens {
        // Older entries were keyed by user id and omit it from the body
        let user_id = token.user_id.clone().unwrap_or_else(|| key.clone());
        candidates.entry(user_id).or_default().push(token.candidate());
    }

    candidates
        .into_iter()
        .map(|(user_id, user_candidates)| {
            let auth = document.user_auth.get(&user_id);
            let nsfw_status = auth
                .and_then(|a| a.nsfw_status.clone())
                .map(LegacyVerification::into_status)
                .unwrap_or_default();

            let token = select_token(user_candidates, now);
            let mut migrated = record(&user_id, token, nsfw_status, now);
            if let Some(created_at) = auth.and_then(|a| a.created_at) {
                migrated.created_at = Some(created_at);
            }
            (user_id, migrated)
        })
        .collect()
}
