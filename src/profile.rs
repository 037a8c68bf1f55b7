//! Presentation helpers over metadata blobs.
//!
//! Metadata is optional enrichment; every helper here has an identifier-based
//! fallback so a record without a readable blob still gets a label.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::models::{Medicine, Participant, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Doctor,
    Patient,
    Medicine,
}

impl RecordKind {
    fn noun(self) -> &'static str {
        match self {
            RecordKind::Doctor => "Doctor",
            RecordKind::Patient => "Patient",
            RecordKind::Medicine => "Medicine",
        }
    }
}

fn non_empty<'a>(meta: &'a Value, key: &str) -> Option<&'a str> {
    meta.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Human name from a profile blob: `name`, else `firstName lastName`, else `title`.
pub fn display_name(meta: &Value) -> Option<String> {
    if let Some(name) = non_empty(meta, "name") {
        return Some(name.to_string());
    }
    let parts: Vec<&str> = ["firstName", "lastName"]
        .iter()
        .filter_map(|k| non_empty(meta, k))
        .collect();
    if !parts.is_empty() {
        return Some(parts.join(" "));
    }
    non_empty(meta, "title").map(str::to_string)
}

pub fn image_url(meta: &Value) -> Option<String> {
    non_empty(meta, "image").map(str::to_string)
}

/// Name from metadata when available, otherwise `"<Kind> #<id>"`.
pub fn display_label(kind: RecordKind, id: u64, meta: Option<&Value>) -> String {
    meta.and_then(display_name)
        .unwrap_or_else(|| format!("{} #{}", kind.noun(), id))
}

/// A participant ready for listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantCard {
    #[serde(flatten)]
    pub participant: Participant,
    pub label: String,
    pub short_address: String,
    pub image: Option<String>,
}

impl ParticipantCard {
    pub fn new(participant: Participant, meta: Option<&Value>) -> Self {
        let kind = match participant {
            Participant::Doctor(_) => RecordKind::Doctor,
            Participant::Patient(_) => RecordKind::Patient,
        };
        ParticipantCard {
            label: display_label(kind, participant.id(), meta),
            short_address: participant.address().short(),
            image: meta.and_then(image_url),
            participant,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineCard {
    #[serde(flatten)]
    pub medicine: Medicine,
    pub label: String,
    pub image: Option<String>,
    pub description: Option<String>,
}

impl MedicineCard {
    pub fn new(medicine: Medicine, meta: Option<&Value>) -> Self {
        MedicineCard {
            label: display_label(RecordKind::Medicine, medicine.id, meta),
            image: meta.and_then(image_url),
            description: meta.and_then(|m| non_empty(m, "description")).map(str::to_string),
            medicine,
        }
    }
}

/// Pairs each participant with its metadata, looked up by role and record id.
pub fn participant_cards(
    participants: Vec<Participant>,
    metadata: &HashMap<(Role, u64), Option<Value>>,
) -> Vec<ParticipantCard> {
    participants
        .into_iter()
        .map(|p| {
            let meta = metadata.get(&(p.role(), p.id())).and_then(Option::as_ref);
            ParticipantCard::new(p, meta)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn label_prefers_metadata_name() {
        let meta = json!({"firstName": "Grace", "lastName": "Hopper"});
        assert_eq!(display_label(RecordKind::Doctor, 3, Some(&meta)), "Grace Hopper");
        let meta = json!({"name": "  Ada  "});
        assert_eq!(display_label(RecordKind::Patient, 1, Some(&meta)), "Ada");
    }

    #[test]
    fn label_falls_back_to_identifier() {
        assert_eq!(display_label(RecordKind::Patient, 7, None), "Patient #7");
        let blank = json!({"name": "", "image": 4});
        assert_eq!(display_label(RecordKind::Medicine, 2, Some(&blank)), "Medicine #2");
        assert_eq!(image_url(&blank), None);
    }
}
