//! The signed-in profile and its toxin records.
//!
//! Mutations save the current view position, refetch the list and restore
//! the position so the user is not thrown back to the top.

use log::{info, warn};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{DangerSummary, Identity, Record, RecordFields};
use crate::transport::{dispatch, ApiRequest, ApiResponse, Method, Transport};

pub struct ProfileManager {
    transport: Arc<dyn Transport>,
    identity: Option<Identity>,
    records: Vec<Record>,
    view_offset: usize,
    saved_offset: Option<usize>,
}

impl std::fmt::Debug for ProfileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileManager")
            .field("identity", &self.identity.as_ref().map(|i| &i.id))
            .field("records", &self.records.len())
            .field("view_offset", &self.view_offset)
            .finish()
    }
}

impl ProfileManager {
    /// Take over a verified identity. Records that came with the
    /// verification response seed the list.
    pub fn new(transport: Arc<dyn Transport>, mut identity: Identity) -> Self {
        let records = std::mem::take(&mut identity.records);
        Self {
            transport,
            identity: Some(identity),
            records,
            view_offset: 0,
            saved_offset: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn danger_summary(&self) -> DangerSummary {
        DangerSummary::from_records(&self.records)
    }

    pub fn can_manage_records(&self) -> bool {
        self.identity.as_ref().map_or(false, Identity::can_manage_records)
    }

    pub fn view_offset(&self) -> usize {
        self.view_offset
    }

    pub fn set_view_offset(&mut self, offset: usize) {
        self.view_offset = offset.min(self.records.len().saturating_sub(1));
    }

    /// Fetch the identity's records. On failure the cached list is kept.
    pub fn refresh(&mut self) -> Result<&[Record]> {
        let id = self.identity_id()?;
        let response = dispatch(
            self.transport.as_ref(),
            ApiRequest::get(format!("/toxin/user/{}", id)),
        );
        let fetched = response.and_then(|r| {
            if r.is_success() {
                r.json::<Vec<Record>>()
            } else {
                Err(Error::TransportError(r.error_message()))
            }
        });

        match fetched {
            Ok(records) => {
                info!("Loaded {} toxin record(s)", records.len());
                self.records = records;
                self.restore_view();
                Ok(&self.records)
            }
            Err(e) => {
                warn!("Could not load toxins, keeping {} cached: {}", self.records.len(), e);
                self.saved_offset = None;
                Err(e)
            }
        }
    }

    pub fn add_record(&mut self, fields: &RecordFields) -> Result<Record> {
        self.require_manager()?;
        fields.validate()?;

        self.save_view();
        let response = self.send_mutation(ApiRequest::json(Method::Post, "/toxin", fields)?)?;
        if !response.is_success() {
            self.saved_offset = None;
            return Err(Error::TransportError(response.error_message()));
        }
        let created = created_record(&response, fields);
        info!("Added toxin {}", fields.name);
        self.refresh_after_mutation();
        Ok(created)
    }

    pub fn edit_record(&mut self, id: &str, fields: &RecordFields) -> Result<()> {
        self.require_manager()?;
        let id = record_id(id)?;
        fields.validate()?;

        self.save_view();
        let request = ApiRequest::json(Method::Put, format!("/toxin/{}", id), fields)?;
        let response = self.send_mutation(request)?;
        self.check_record_response(&response, id)?;
        info!("Edited toxin {}", id);
        self.refresh_after_mutation();
        Ok(())
    }

    pub fn delete_record(&mut self, id: &str) -> Result<()> {
        self.require_manager()?;
        let id = record_id(id)?;

        self.save_view();
        let response = self.send_mutation(ApiRequest::delete(format!("/toxin/{}", id)))?;
        self.check_record_response(&response, id)?;
        info!("Deleted toxin {}", id);
        self.refresh_after_mutation();
        Ok(())
    }

    /// Remove the account. On success the identity and its records are
    /// forgotten.
    pub fn delete_account(&mut self) -> Result<()> {
        let id = self.identity_id()?.to_string();
        let request = ApiRequest::delete(format!("/user/{}", id));
        let response = dispatch(self.transport.as_ref(), request)?;
        match response.status {
            200..=299 => {
                let name = self.identity.take().map(|i| i.name).unwrap_or_default();
                self.records.clear();
                self.view_offset = 0;
                self.saved_offset = None;
                info!("Account {} ({}) deleted", id, name);
                Ok(())
            }
            404 => Err(Error::RecordNotFound(format!("user {}", id))),
            _ => Err(Error::TransportError(response.error_message())),
        }
    }

    fn identity_id(&self) -> Result<&str> {
        match &self.identity {
            Some(identity) if !identity.id.trim().is_empty() => Ok(identity.id.trim()),
            _ => Err(Error::MissingIdentity),
        }
    }

    fn require_manager(&self) -> Result<()> {
        self.identity_id()?;
        if self.can_manage_records() {
            Ok(())
        } else {
            Err(Error::AccessDenied)
        }
    }

    fn send_mutation(&mut self, request: ApiRequest) -> Result<ApiResponse> {
        dispatch(self.transport.as_ref(), request).map_err(|e| {
            self.saved_offset = None;
            e
        })
    }

    fn check_record_response(&mut self, response: &ApiResponse, id: &str) -> Result<()> {
        match response.status {
            200..=299 => Ok(()),
            404 => {
                self.saved_offset = None;
                Err(Error::RecordNotFound(format!("toxin {}", id)))
            }
            _ => {
                self.saved_offset = None;
                Err(Error::TransportError(response.error_message()))
            }
        }
    }

    /// The mutation already succeeded; a failed refetch only leaves the list stale.
    fn refresh_after_mutation(&mut self) {
        if let Err(e) = self.refresh() {
            warn!("Toxin list may be stale: {}", e);
        }
    }

    fn save_view(&mut self) {
        self.saved_offset = Some(self.view_offset);
    }

    fn restore_view(&mut self) {
        if let Some(offset) = self.saved_offset.take() {
            self.set_view_offset(offset);
        } else if self.view_offset >= self.records.len() {
            self.view_offset = self.records.len().saturating_sub(1);
        }
    }
}

fn record_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        Err(Error::ValidationError("toxin id is missing".into()))
    } else {
        Ok(id)
    }
}

/// The service answers with the record itself or wrapped in `data`.
fn parse_created(body: &[u8]) -> serde_json::Result<Record> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let inner = value.get("data").cloned().unwrap_or(value);
    serde_json::from_value(inner)
}

/// The create succeeded even if its body is unreadable; fall back to the
/// submitted fields until the refetch brings the real record.
fn created_record(response: &ApiResponse, fields: &RecordFields) -> Record {
    match parse_created(&response.body) {
        Ok(record) => record,
        Err(e) => {
            warn!("Toxin created but the response is not a record ({}), using submitted fields", e);
            Record {
                id: String::new(),
                name: fields.name.clone(),
                category: fields.category.clone(),
                danger: fields.danger,
                access_level: fields.access_level,
                created_at: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessLevel, DangerTier};
    use crate::transport::testing::ScriptedTransport;

    const TWO_RECORDS: &str = r#"[
        {"_id": "a", "nome": "Benzene", "tipo": "Solvent", "periculosidade": 3, "nivel": 2},
        {"_id": "b", "nome": "Atrazine", "tipo": "Herbicide", "periculosidade": 1, "nivel": 1}
    ]"#;

    fn identity(level: AccessLevel) -> Identity {
        Identity {
            id: "u-1".into(),
            name: "Marina".into(),
            access_level: level,
            image_base64: None,
            records: Vec::new(),
        }
    }

    fn manager(transport: &Arc<ScriptedTransport>, level: AccessLevel) -> ProfileManager {
        ProfileManager::new(transport.clone(), identity(level))
    }

    fn fields() -> RecordFields {
        RecordFields {
            name: "Dioxin".into(),
            category: "Industrial".into(),
            danger: DangerTier::High,
            access_level: AccessLevel::Minister,
        }
    }

    #[test]
    fn refresh_replaces_list() {
        let transport = Arc::new(ScriptedTransport::new().respond(200, TWO_RECORDS));
        let mut profile = manager(&transport, AccessLevel::Basic);
        assert_eq!(profile.refresh().unwrap().len(), 2);
        assert_eq!(transport.request(0).path, "/toxin/user/u-1");
        assert_eq!(profile.danger_summary().high, 1);
    }

    #[test]
    fn failed_refresh_keeps_previous_list() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(200, TWO_RECORDS)
                .respond(500, r#"{"erro": "db down"}"#)
                .fail("timed out"),
        );
        let mut profile = manager(&transport, AccessLevel::Basic);
        profile.refresh().unwrap();

        assert!(profile.refresh().is_err());
        assert_eq!(profile.records().len(), 2);
        assert!(matches!(profile.refresh(), Err(Error::TransportError(_))));
        assert_eq!(profile.records()[0].name, "Benzene");
    }

    #[test]
    fn verification_records_seed_the_list() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut id = identity(AccessLevel::Basic);
        id.records = serde_json::from_str(TWO_RECORDS).unwrap();
        let profile = ProfileManager::new(transport, id);
        assert_eq!(profile.records().len(), 2);
        assert!(profile.identity().unwrap().records.is_empty());
    }

    #[test]
    fn mutations_require_level_three() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut profile = manager(&transport, AccessLevel::Restricted);
        assert!(!profile.can_manage_records());
        assert!(matches!(profile.add_record(&fields()), Err(Error::AccessDenied)));
        assert!(matches!(profile.edit_record("a", &fields()), Err(Error::AccessDenied)));
        assert!(matches!(profile.delete_record("a"), Err(Error::AccessDenied)));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn add_posts_fields_and_refetches() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(
                    201,
                    r#"{"data": {"_id": "c", "nome": "Dioxin", "tipo": "Industrial",
                                 "periculosidade": 3, "nivel": 3}}"#,
                )
                .respond(200, TWO_RECORDS),
        );
        let mut profile = manager(&transport, AccessLevel::Minister);
        let created = profile.add_record(&fields()).unwrap();
        assert_eq!(created.id, "c");

        let post = transport.request(0);
        assert_eq!(post.path, "/toxin");
        let body: serde_json::Value = serde_json::from_slice(&post.body.unwrap()).unwrap();
        assert_eq!(body["periculosidade"], 3);
        assert_eq!(transport.request(1).path, "/toxin/user/u-1");
        assert_eq!(profile.records().len(), 2);
    }

    #[test]
    fn created_body_may_be_bare_or_wrapped() {
        let bare = br#"{"_id": "c", "nome": "Dioxin", "periculosidade": 3, "nivel": 3}"#;
        assert_eq!(parse_created(bare).unwrap().id, "c");
        let wrapped =
            br#"{"data": {"_id": "d", "nome": "Dioxin", "periculosidade": 3, "nivel": 3}}"#;
        assert_eq!(parse_created(wrapped).unwrap().id, "d");
        assert!(parse_created(b"created").is_err());
        assert!(parse_created(br#"{"data": {"nome": "no id"}}"#).is_err());
    }

    #[test]
    fn unreadable_create_response_falls_back_to_fields() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(201, "created")
                .respond(200, TWO_RECORDS),
        );
        let mut profile = manager(&transport, AccessLevel::Minister);
        let created = profile.add_record(&fields()).unwrap();
        assert!(created.id.is_empty());
        assert_eq!(created.fields(), fields());
        assert_eq!(profile.records().len(), 2);
    }

    #[test]
    fn edit_of_missing_record_is_not_found() {
        let transport =
            Arc::new(ScriptedTransport::new().respond(404, r#"{"message": "not found"}"#));
        let mut profile = manager(&transport, AccessLevel::Minister);
        let err = profile.edit_record("  zz  ", &fields()).unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
        assert_eq!(transport.request(0).path, "/toxin/zz");
        assert_eq!(transport.request(0).method, Method::Put);
    }

    #[test]
    fn blank_record_id_is_rejected_locally() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut profile = manager(&transport, AccessLevel::Minister);
        assert!(matches!(profile.delete_record("  "), Err(Error::ValidationError(_))));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn delete_restores_view_position() {
        let many: Vec<serde_json::Value> = (0..10)
            .map(|i| {
                serde_json::json!({
                    "_id": i.to_string(),
                    "nome": "T",
                    "tipo": "",
                    "periculosidade": 1,
                    "nivel": 1
                })
            })
            .collect();
        let many = serde_json::to_string(&many).unwrap();
        let fewer: Vec<serde_json::Value> = (0..3)
            .map(|i| {
                serde_json::json!({
                    "_id": i.to_string(),
                    "nome": "T",
                    "tipo": "",
                    "periculosidade": 1,
                    "nivel": 1
                })
            })
            .collect();
        let fewer = serde_json::to_string(&fewer).unwrap();

        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(200, &many)
                .respond(204, "")
                .respond(200, &many)
                .respond(204, "")
                .respond(200, &fewer),
        );
        let mut profile = manager(&transport, AccessLevel::Minister);
        profile.refresh().unwrap();
        profile.set_view_offset(6);

        profile.delete_record("4").unwrap();
        assert_eq!(profile.view_offset(), 6);

        profile.delete_record("5").unwrap();
        assert_eq!(profile.view_offset(), 2);
    }

    #[test]
    fn deleting_account_forgets_identity() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(200, TWO_RECORDS)
                .respond(204, ""),
        );
        let mut profile = manager(&transport, AccessLevel::Basic);
        profile.refresh().unwrap();
        profile.delete_account().unwrap();

        assert_eq!(transport.request(1).path, "/user/u-1");
        assert_eq!(transport.request(1).method, Method::Delete);
        assert!(profile.identity().is_none());
        assert!(profile.records().is_empty());
        assert!(matches!(profile.refresh(), Err(Error::MissingIdentity)));
    }

    #[test]
    fn deleting_unknown_account_is_not_found() {
        let transport = Arc::new(ScriptedTransport::new().respond(404, ""));
        let mut profile = manager(&transport, AccessLevel::Basic);
        assert!(matches!(profile.delete_account(), Err(Error::RecordNotFound(_))));
        assert!(profile.identity().is_some());
    }
}
