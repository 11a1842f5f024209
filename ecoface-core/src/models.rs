//! Identity and toxin records as exchanged with the recognition service.
//!
//! Field names follow the service's wire format (`nome`, `nivel`, ...); the
//! Rust side uses English names.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::media;

/// Ordinal access tier. Only `Minister` may manage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AccessLevel {
    Basic = 1,
    Restricted = 2,
    Minister = 3,
}

impl AccessLevel {
    pub fn label(self) -> &'static str {
        match self {
            AccessLevel::Basic => "Basic access",
            AccessLevel::Restricted => "Restricted access",
            AccessLevel::Minister => "Environment Minister",
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(AccessLevel::Basic),
            2 => Ok(AccessLevel::Restricted),
            3 => Ok(AccessLevel::Minister),
            other => Err(format!("access level must be 1, 2 or 3 (got {})", other)),
        }
    }
}

impl From<AccessLevel> for u8 {
    fn from(level: AccessLevel) -> u8 {
        level as u8
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Level {}", self.as_u8())
    }
}

/// Ordinal severity of a toxin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DangerTier {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl DangerTier {
    pub fn label(self) -> &'static str {
        match self {
            DangerTier::Low => "Low",
            DangerTier::Medium => "Medium",
            DangerTier::High => "High",
        }
    }
}

impl TryFrom<u8> for DangerTier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(DangerTier::Low),
            2 => Ok(DangerTier::Medium),
            3 => Ok(DangerTier::High),
            other => Err(format!("danger tier must be 1, 2 or 3 (got {})", other)),
        }
    }
}

impl From<DangerTier> for u8 {
    fn from(tier: DangerTier) -> u8 {
        tier as u8
    }
}

impl std::fmt::Display for DangerTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A toxin entry owned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "tipo", default)]
    pub category: String,
    #[serde(rename = "periculosidade")]
    pub danger: DangerTier,
    #[serde(rename = "nivel")]
    pub access_level: AccessLevel,
    #[serde(rename = "criado_em", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record {
    /// Creation time, when the service sent one in a format we understand.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%a, %d %b %Y %H:%M:%S GMT"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn fields(&self) -> RecordFields {
        RecordFields {
            name: self.name.clone(),
            category: self.category.clone(),
            danger: self.danger,
            access_level: self.access_level,
        }
    }
}

/// The client-editable part of a record, sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "tipo")]
    pub category: String,
    #[serde(rename = "periculosidade")]
    pub danger: DangerTier,
    #[serde(rename = "nivel")]
    pub access_level: AccessLevel,
}

impl RecordFields {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::ValidationError("toxin name must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for RecordFields {
    fn default() -> Self {
        Self {
            name: String::new(),
            category: String::new(),
            danger: DangerTier::Low,
            access_level: AccessLevel::Basic,
        }
    }
}

/// A verified or registered person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "nivel")]
    pub access_level: AccessLevel,
    /// Reference image as base64, with or without a data-URI header.
    #[serde(rename = "imagem_base64", default)]
    pub image_base64: Option<String>,
    /// Records the service attached to a verification response.
    #[serde(rename = "toxinas", default)]
    pub records: Vec<Record>,
}

impl Identity {
    pub fn can_manage_records(&self) -> bool {
        self.access_level == AccessLevel::Minister
    }

    /// Decoded reference JPEG. The service may send it with or without a
    /// data-URI header.
    pub fn reference_jpeg(&self) -> Result<Option<Vec<u8>>> {
        match self.image_base64.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(b64) => media::decode_still(b64).map(Some),
        }
    }
}

/// Record counts per danger tier, as shown on the profile page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DangerSummary {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl DangerSummary {
    pub fn from_records(records: &[Record]) -> Self {
        records.iter().fold(Self::default(), |mut acc, r| {
            match r.danger {
                DangerTier::High => acc.high += 1,
                DangerTier::Medium => acc.medium += 1,
                DangerTier::Low => acc.low += 1,
            }
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_parses_service_payload() {
        let json = r#"{
            "_id": "65f0c0ffee",
            "nome": "Mercury",
            "tipo": "Heavy metal",
            "periculosidade": 3,
            "nivel": 2,
            "criado_em": "2025-03-01 10:15:00"
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.name, "Mercury");
        assert_eq!(record.danger, DangerTier::High);
        assert_eq!(record.access_level, AccessLevel::Restricted);
        let created = record.created_at_utc().unwrap();
        assert_eq!(created.to_rfc3339(), "2025-03-01T10:15:00+00:00");
    }

    #[test]
    fn out_of_range_tiers_are_rejected() {
        let json = r#"{"_id":"x","nome":"Lead","tipo":"","periculosidade":4,"nivel":1}"#;
        assert!(serde_json::from_str::<Record>(json).is_err());

        let json = r#"{"_id":"x","nome":"Ana","nivel":0}"#;
        assert!(serde_json::from_str::<Identity>(json).is_err());
    }

    #[test]
    fn fields_serialize_with_wire_names() {
        let fields = RecordFields {
            name: "Arsenic".into(),
            category: "Metalloid".into(),
            danger: DangerTier::High,
            access_level: AccessLevel::Minister,
        };
        let value = serde_json::to_value(&fields).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "nome": "Arsenic",
                "tipo": "Metalloid",
                "periculosidade": 3,
                "nivel": 3
            })
        );
    }

    #[test]
    fn blank_record_name_fails_validation() {
        let fields = RecordFields { name: "   ".into(), ..RecordFields::default() };
        assert!(matches!(fields.validate(), Err(Error::ValidationError(_))));
    }

    #[test]
    fn only_minister_manages_records() {
        let mut identity = Identity {
            id: "1".into(),
            name: "Ana".into(),
            access_level: AccessLevel::Restricted,
            image_base64: None,
            records: Vec::new(),
        };
        assert!(!identity.can_manage_records());
        identity.access_level = AccessLevel::Minister;
        assert!(identity.can_manage_records());
        assert_eq!(identity.access_level.label(), "Environment Minister");
    }

    #[test]
    fn reference_photo_decodes_with_or_without_header() {
        let json = r#"{"_id": "1", "nome": "Ana", "nivel": 1,
                       "imagem_base64": "data:image/jpeg;base64,/9j/2Q=="}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.reference_jpeg().unwrap(), Some(vec![0xff, 0xd8, 0xff, 0xd9]));

        let json = r#"{"_id": "1", "nome": "Ana", "nivel": 1, "imagem_base64": "/9j/2Q=="}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.reference_jpeg().unwrap(), Some(vec![0xff, 0xd8, 0xff, 0xd9]));

        let json = r#"{"_id": "1", "nome": "Ana", "nivel": 1, "imagem_base64": "not base64!"}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert!(matches!(identity.reference_jpeg(), Err(Error::ValidationError(_))));

        let json = r#"{"_id": "1", "nome": "Ana", "nivel": 1}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.reference_jpeg().unwrap(), None);
    }

    #[test]
    fn summary_counts_each_tier() {
        let make = |danger| Record {
            id: "id".into(),
            name: "n".into(),
            category: String::new(),
            danger,
            access_level: AccessLevel::Basic,
            created_at: None,
        };
        let records = vec![make(DangerTier::High), make(DangerTier::High), make(DangerTier::Low)];
        let summary = DangerSummary::from_records(&records);
        assert_eq!(summary, DangerSummary { high: 2, medium: 0, low: 1 });
    }
}
