use serde::{Deserialize, Deserializer, Serialize};

/// A user as published by the directory service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "userID", deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    pub email: String,
    /// PEM-encoded public key
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Registration timestamp (seconds since epoch, fractional)
    #[serde(deserialize_with = "timestamp")]
    pub ts: f64,
}

/// A file owned by the current token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "fileID", deserialize_with = "string_or_number")]
    pub file_id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Server acknowledgement of an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(deserialize_with = "string_or_number")]
    pub file_id: String,
    #[serde(default)]
    pub file_size: u64,
}

/// Server acknowledgement of a registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Some deployments echo the new id, older ones do not
    #[serde(rename = "userID", default, deserialize_with = "opt_string_or_number")]
    pub user_id: Option<String>,
    #[serde(deserialize_with = "timestamp")]
    pub ts: f64,
}

impl Registration {
    /// Pick the user id for this registration.
    ///
    /// Uses the echoed id when present; otherwise the candidate whose
    /// timestamp is closest to ours.
    pub fn resolve_user_id(&self, candidates: &[UserRecord]) -> Option<String> {
        if let Some(id) = &self.user_id {
            return Some(id.clone());
        }
        candidates
            .iter()
            .min_by(|a, b| {
                let da = (a.ts - self.ts).abs();
                let db = (b.ts - self.ts).abs();
                da.total_cmp(&db)
            })
            .map(|u| u.user_id.clone())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match StringOrNumber::deserialize(d)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Int(i) => i.to_string(),
        StringOrNumber::Float(f) => f.to_string(),
    })
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(d)?.map(|v| match v {
        StringOrNumber::String(s) => s,
        StringOrNumber::Int(i) => i.to_string(),
        StringOrNumber::Float(f) => f.to_string(),
    }))
}

fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match StringOrNumber::deserialize(d)? {
        StringOrNumber::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        StringOrNumber::Int(i) => Ok(i as f64),
        StringOrNumber::Float(f) => Ok(f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, ts: f64) -> UserRecord {
        UserRecord {
            user_id: id.into(),
            name: "alice".into(),
            email: "alice@example.com".into(),
            public_key: String::new(),
            ts,
        }
    }

    #[test]
    fn test_user_record_wire_names() {
        let json = r#"{"userID": 42, "nombre": "alice", "email": "a@x", "publicKey": "PEM", "ts": "1600000000.5"}"#;
        let u: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(u.user_id, "42");
        assert_eq!(u.name, "alice");
        assert_eq!(u.public_key, "PEM");
        assert_eq!(u.ts, 1600000000.5);
    }

    #[test]
    fn test_resolve_prefers_echoed_id() {
        let reg = Registration {
            user_id: Some("7".into()),
            ts: 100.0,
        };
        assert_eq!(reg.resolve_user_id(&[user("1", 100.0)]), Some("7".into()));
    }

    #[test]
    fn test_resolve_closest_timestamp() {
        let reg = Registration {
            user_id: None,
            ts: 100.0,
        };
        let candidates = [user("old", 10.0), user("mine", 100.2), user("later", 150.0)];
        assert_eq!(reg.resolve_user_id(&candidates), Some("mine".into()));
        assert_eq!(reg.resolve_user_id(&[]), None);
    }

    #[test]
    fn test_file_record_and_receipt() {
        let f: FileRecord = serde_json::from_str(r#"{"fileID": "ab12", "fileName": "x.txt"}"#).unwrap();
        assert_eq!(f.file_id, "ab12");
        let r: UploadReceipt = serde_json::from_str(r#"{"file_id": "ab12", "file_size": 10}"#).unwrap();
        assert_eq!(r.file_size, 10);
    }
}
