//! Typed ledger records and their decoders.
//!
//! Raw ledger values are JSON objects whose numeric fields come in whatever
//! encoding the RPC client produced. Decoding goes through [`crate::normalize`]
//! once, so nothing downstream inspects raw shapes again.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::{normalize_number, normalize_u64, short_address};

/// Account address. Equality and hashing ignore ASCII case because the ledger
/// does not promise checksummed or lowercased output.
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Address(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercased form, used as a map key by the in-process ledger.
    pub fn canonical(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }

    pub fn short(&self) -> String {
        short_address(&self.0)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    None,
    Doctor,
    Patient,
}

impl Role {
    /// Ledger encoding: `1` doctor, `2` patient, anything else unregistered.
    pub fn from_code(code: u128) -> Self {
        match code {
            1 => Role::Doctor,
            2 => Role::Patient,
            _ => Role::None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Role::None => 0,
            Role::Doctor => 1,
            Role::Patient => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doctor" => Some(Role::Doctor),
            "patient" => Some(Role::Patient),
            "none" | "" => Some(Role::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub address: Address,
    pub name: String,
}

/// Role lookup result for an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub name: String,
    pub role: Role,
    pub counterparties: Vec<Counterparty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: u64,
    pub metadata_ref: String,
    pub address: Address,
    pub appointment_count: u64,
    pub successful_treatment_count: u64,
    pub is_approved: bool,
}

/// Medical history is only ever appended by the ledger, so it is exposed
/// read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: u64,
    pub metadata_ref: String,
    medical_history: Vec<String>,
    pub address: Address,
    pub bought_medicines: Vec<u64>,
}

impl Patient {
    pub fn medical_history(&self) -> &[String] {
        &self.medical_history
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medicine {
    pub id: u64,
    pub metadata_ref: String,
    /// Smallest currency unit.
    pub price: u128,
    pub quantity: u64,
    pub discount_percent: u8,
    pub current_location: String,
    pub active: bool,
}

impl Medicine {
    /// Payment owed for `quantity` units after discount, or `None` on overflow.
    pub fn purchase_total(&self, quantity: u64) -> Option<u128> {
        discounted_total(self.price, quantity, self.discount_percent)
    }
}

/// `price × quantity × (100 − discount) / 100`, multiplying before dividing
/// so whole-unit prices lose nothing to rounding.
pub fn discounted_total(price: u128, quantity: u64, discount_percent: u8) -> Option<u128> {
    let keep = 100u128.checked_sub(u128::from(discount_percent.min(100)))?;
    price
        .checked_mul(u128::from(quantity))?
        .checked_mul(keep)
        .map(|v| v / 100)
}

/// Appointment lifecycle as observed on the ledger. `Unknown` covers an
/// absent or non-boolean `isOpen` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Unknown,
}

impl AppointmentStatus {
    fn from_raw(raw: Option<&Value>) -> Self {
        match raw {
            Some(Value::Bool(true)) => AppointmentStatus::Scheduled,
            Some(Value::Bool(false)) => AppointmentStatus::Completed,
            _ => AppointmentStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: u64,
    pub patient_id: u64,
    pub doctor_id: u64,
    /// Booking time, seconds since the epoch.
    pub date: u64,
    pub from: String,
    pub to: String,
    pub appointment_date: String,
    pub condition: String,
    pub message: String,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: u64,
    pub medicine_id: u64,
    pub patient_id: u64,
    pub doctor_id: u64,
    pub date: u64,
}

impl Prescription {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        epoch_seconds(self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: Address,
    pub timestamp: u64,
    pub text: String,
}

impl Message {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        epoch_seconds(self.timestamp)
    }
}

fn epoch_seconds(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}

/// A doctor or patient, as listed to the other side of the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Participant {
    Doctor(Doctor),
    Patient(Patient),
}

impl Participant {
    pub fn address(&self) -> &Address {
        match self {
            Participant::Doctor(d) => &d.address,
            Participant::Patient(p) => &p.address,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Participant::Doctor(d) => d.id,
            Participant::Patient(p) => p.id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Participant::Doctor(_) => Role::Doctor,
            Participant::Patient(_) => Role::Patient,
        }
    }

    pub fn metadata_ref(&self) -> &str {
        match self {
            Participant::Doctor(d) => &d.metadata_ref,
            Participant::Patient(p) => &p.metadata_ref,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Builds a typed record from a raw ledger value.
pub trait FromRaw: Sized {
    fn from_raw(raw: &Value) -> Result<Self, String>;

    /// True for the zeroed struct a ledger mapping returns for an unknown key.
    fn is_absent(&self) -> bool {
        false
    }
}

fn object(raw: &Value) -> Result<&serde_json::Map<String, Value>, String> {
    raw.as_object()
        .ok_or_else(|| format!("expected a record, got {}", kind_of(raw)))
}

fn kind_of(raw: &Value) -> &'static str {
    match raw {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn text(map: &serde_json::Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn flag(map: &serde_json::Map<String, Value>, key: &str) -> bool {
    matches!(map.get(key), Some(Value::Bool(true)))
}

fn uint(map: &serde_json::Map<String, Value>, key: &str) -> u64 {
    map.get(key).map(normalize_u64).unwrap_or(0)
}

fn address(map: &serde_json::Map<String, Value>, key: &str) -> Result<Address, String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Address::new(s.as_str())),
        _ => Err(format!("record has no `{key}`")),
    }
}

fn list<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> &'a [Value] {
    map.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

impl FromRaw for UserRecord {
    fn from_raw(raw: &Value) -> Result<Self, String> {
        let map = object(raw)?;
        let counterparties = list(map, "friendList")
            .iter()
            .filter_map(|f| {
                let f = f.as_object()?;
                let address = address(f, "pubkey").ok()?;
                Some(Counterparty {
                    address,
                    name: text(f, "name"),
                })
            })
            .collect();
        Ok(UserRecord {
            name: text(map, "name"),
            role: Role::from_code(map.get("userType").map(normalize_number).unwrap_or(0)),
            counterparties,
        })
    }
}

impl FromRaw for Doctor {
    fn is_absent(&self) -> bool {
        self.id == 0
    }

    fn from_raw(raw: &Value) -> Result<Self, String> {
        let map = object(raw)?;
        Ok(Doctor {
            id: uint(map, "id"),
            metadata_ref: text(map, "IPFS_URL"),
            address: address(map, "accountAddress")?,
            appointment_count: uint(map, "appointmentCount"),
            successful_treatment_count: uint(map, "successfulTreatmentCount"),
            is_approved: flag(map, "isApproved"),
        })
    }
}

impl FromRaw for Patient {
    fn is_absent(&self) -> bool {
        self.id == 0
    }

    fn from_raw(raw: &Value) -> Result<Self, String> {
        let map = object(raw)?;
        Ok(Patient {
            id: uint(map, "id"),
            metadata_ref: text(map, "IPFS_URL"),
            medical_history: list(map, "medicalHistory")
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            address: address(map, "accountAddress")?,
            bought_medicines: list(map, "boughtMedicines").iter().map(normalize_u64).collect(),
        })
    }
}

impl FromRaw for Medicine {
    fn is_absent(&self) -> bool {
        self.id == 0
    }

    fn from_raw(raw: &Value) -> Result<Self, String> {
        let map = object(raw)?;
        let discount = uint(map, "discount").min(100) as u8;
        Ok(Medicine {
            id: uint(map, "id"),
            metadata_ref: text(map, "IPFS_URL"),
            price: map.get("price").map(normalize_number).unwrap_or(0),
            quantity: uint(map, "quantity"),
            discount_percent: discount,
            current_location: text(map, "currentLocation"),
            active: flag(map, "active"),
        })
    }
}

impl FromRaw for Appointment {
    fn is_absent(&self) -> bool {
        self.id == 0
    }

    fn from_raw(raw: &Value) -> Result<Self, String> {
        let map = object(raw)?;
        Ok(Appointment {
            id: uint(map, "id"),
            patient_id: uint(map, "patientId"),
            doctor_id: uint(map, "doctorId"),
            date: uint(map, "date"),
            from: text(map, "from"),
            to: text(map, "to"),
            appointment_date: text(map, "appointmentDate"),
            condition: text(map, "condition"),
            message: text(map, "message"),
            status: AppointmentStatus::from_raw(map.get("isOpen")),
        })
    }
}

impl FromRaw for Prescription {
    fn is_absent(&self) -> bool {
        self.id == 0
    }

    fn from_raw(raw: &Value) -> Result<Self, String> {
        let map = object(raw)?;
        Ok(Prescription {
            id: uint(map, "id"),
            medicine_id: uint(map, "medicineId"),
            patient_id: uint(map, "patientId"),
            doctor_id: uint(map, "doctorId"),
            date: uint(map, "date"),
        })
    }
}

impl FromRaw for Message {
    fn from_raw(raw: &Value) -> Result<Self, String> {
        let map = object(raw)?;
        Ok(Message {
            sender: address(map, "sender")?,
            timestamp: uint(map, "timestamp"),
            text: text(map, "msg"),
        })
    }
}

/// Decodes a raw array of records; a non-array decodes as empty.
pub fn decode_list<T: FromRaw>(raw: &Value) -> Result<Vec<T>, String> {
    match raw {
        Value::Array(items) => items.iter().map(T::from_raw).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(format!("expected a list, got {}", kind_of(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn address_equality_ignores_case() {
        let a = Address::new("0xAbCdEf0000000000000000000000000000000001");
        let b = Address::new("0xabcdef0000000000000000000000000000000001");
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn discount_applies_after_multiplying() {
        let total = discounted_total(1_000_000_000_000_000_000, 2, 20);
        assert_eq!(total, Some(1_600_000_000_000_000_000));
        assert_eq!(discounted_total(3, 1, 50), Some(1));
        assert_eq!(discounted_total(u128::MAX, 2, 0), None);
        assert_eq!(discounted_total(10, 1, 100), Some(0));
    }

    #[test]
    fn appointment_status_is_tri_state() {
        let mut raw = json!({"id": 1, "patientId": 1, "doctorId": 2, "isOpen": true});
        assert_eq!(Appointment::from_raw(&raw).unwrap().status, AppointmentStatus::Scheduled);
        raw["isOpen"] = json!(false);
        assert_eq!(Appointment::from_raw(&raw).unwrap().status, AppointmentStatus::Completed);
        raw.as_object_mut().unwrap().remove("isOpen");
        assert_eq!(Appointment::from_raw(&raw).unwrap().status, AppointmentStatus::Unknown);
    }

    #[test]
    fn medicine_decodes_wrapped_numbers_and_clamps_discount() {
        let raw = json!({
            "id": {"type": "BigNumber", "hex": "0x3"},
            "IPFS_URL": "https://gateway.pinata.cloud/ipfs/QmMed",
            "price": "1000000000000000000",
            "quantity": 12,
            "discount": 250,
            "currentLocation": "Lagos",
            "active": true
        });
        let med = Medicine::from_raw(&raw).unwrap();
        assert_eq!(med.id, 3);
        assert_eq!(med.price, 1_000_000_000_000_000_000);
        assert_eq!(med.discount_percent, 100);
        assert!(med.active);
    }

    #[test]
    fn doctor_without_address_is_a_decode_error() {
        let err = Doctor::from_raw(&json!({"id": 1})).unwrap_err();
        assert!(err.contains("accountAddress"));
        assert!(Doctor::from_raw(&json!("junk")).is_err());
    }

    #[test]
    fn user_record_skips_malformed_friends() {
        let raw = json!({
            "name": "Ada",
            "userType": "2",
            "friendList": [
                {"pubkey": "0x00000000000000000000000000000000000000aa", "name": "Dr. Who"},
                {"name": "no address"},
                7
            ]
        });
        let user = UserRecord::from_raw(&raw).unwrap();
        assert_eq!(user.role, Role::Patient);
        assert_eq!(user.counterparties.len(), 1);
    }

    #[test]
    fn zeroed_structs_are_absent() {
        let zeroed = json!({
            "id": {"type": "BigNumber", "hex": "0x0"},
            "IPFS_URL": "",
            "price": "0",
            "quantity": 0,
            "discount": 0,
            "currentLocation": "",
            "active": false,
        });
        assert!(Medicine::from_raw(&zeroed).unwrap().is_absent());
        let doctor = json!({
            "id": 0,
            "accountAddress": "0x0000000000000000000000000000000000000000",
            "isApproved": false,
        });
        assert!(Doctor::from_raw(&doctor).unwrap().is_absent());
        let real = json!({"id": "0x3", "price": 10, "quantity": 1});
        assert!(!Medicine::from_raw(&real).unwrap().is_absent());
    }

    #[test]
    fn list_decoding() {
        let raw = json!([{"sender": "0x01", "timestamp": 5, "msg": "hi"}]);
        let msgs: Vec<Message> = decode_list(&raw).unwrap();
        assert_eq!(msgs[0].text, "hi");
        assert!(decode_list::<Message>(&Value::Null).unwrap().is_empty());
        assert!(decode_list::<Message>(&json!(3)).is_err());
    }

    proptest::proptest! {
        #[test]
        fn address_case_never_matters(hex in "[0-9a-fA-F]{40}") {
            let mixed = Address::new(format!("0x{hex}"));
            let upper = Address::new(format!("0x{}", hex.to_uppercase()));
            let lower = Address::new(format!("0x{}", hex.to_lowercase()));
            proptest::prop_assert_eq!(&mixed, &upper);
            proptest::prop_assert_eq!(&mixed, &lower);
            proptest::prop_assert!(mixed.matches(upper.as_str()));
        }
    }
}
