//! Read aggregation: composite views assembled from several ledger reads.
//!
//! Independent reads are issued together and joined; a read whose arguments
//! come from another read's result runs after it.

use std::collections::HashMap;
use std::hash::Hash;

use futures::future::{join_all, try_join_all};
use serde::Serialize;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::error::{BlobError, GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::ipfs::content_id_from_ref;
use crate::ledger::{arg_address, arg_uint, methods};
use crate::models::{
    Address, Appointment, Counterparty, Doctor, Medicine, Message, Participant, Patient,
    Prescription, Role, UserRecord,
};
use crate::normalize::normalize_u64;
use crate::profile::{MedicineCard, ParticipantCard, participant_cards};

/// Who an address is, as far as the ledger knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub address: Address,
    pub name: String,
    pub role: Role,
    pub counterparties: Vec<Counterparty>,
    pub profile: Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientContacts {
    pub patient: Patient,
    pub contacts: Vec<Counterparty>,
}

impl Gateway {
    /// Role lookup; `None` for an unregistered address.
    pub async fn user(&self, address: &Address) -> GatewayResult<Option<UserRecord>> {
        let user: Option<UserRecord> = self
            .read_record(methods::GET_USER, vec![arg_address(address)])
            .await?;
        Ok(user.filter(|u| u.role != Role::None))
    }

    pub async fn role_of(&self, address: &Address) -> GatewayResult<Role> {
        Ok(self.user(address).await?.map_or(Role::None, |u| u.role))
    }

    pub async fn doctor_id_of(&self, address: &Address) -> GatewayResult<Option<u64>> {
        let raw = self
            .read_raw(methods::GET_DOCTOR_ID, vec![arg_address(address)])
            .await?;
        Ok(Some(normalize_u64(&raw)).filter(|id| *id != 0))
    }

    pub async fn patient_id_of(&self, address: &Address) -> GatewayResult<Option<u64>> {
        let raw = self
            .read_raw(methods::GET_PATIENT_ID, vec![arg_address(address)])
            .await?;
        Ok(Some(normalize_u64(&raw)).filter(|id| *id != 0))
    }

    pub async fn doctor(&self, id: u64) -> GatewayResult<Option<Doctor>> {
        self.read_record(methods::GET_DOCTOR, vec![arg_uint(id)]).await
    }

    pub async fn patient(&self, id: u64) -> GatewayResult<Option<Patient>> {
        self.read_record(methods::GET_PATIENT, vec![arg_uint(id)]).await
    }

    /// Role, then id, then record. Returns `None` for an unregistered address.
    #[instrument(skip_all, fields(address = %address))]
    pub async fn resolve_identity(&self, address: &Address) -> GatewayResult<Option<Identity>> {
        let Some(user) = self.user(address).await? else {
            return Ok(None);
        };

        let profile = match user.role {
            Role::Doctor => {
                let id = self
                    .doctor_id_of(address)
                    .await?
                    .ok_or_else(|| dangling(methods::GET_DOCTOR_ID, "doctor", address))?;
                let doctor = self
                    .doctor(id)
                    .await?
                    .ok_or_else(|| dangling(methods::GET_DOCTOR, "doctor", address))?;
                Participant::Doctor(doctor)
            }
            Role::Patient => {
                let id = self
                    .patient_id_of(address)
                    .await?
                    .ok_or_else(|| dangling(methods::GET_PATIENT_ID, "patient", address))?;
                let patient = self
                    .patient(id)
                    .await?
                    .ok_or_else(|| dangling(methods::GET_PATIENT, "patient", address))?;
                Participant::Patient(patient)
            }
            Role::None => return Ok(None),
        };

        Ok(Some(Identity {
            address: address.clone(),
            name: user.name,
            role: user.role,
            counterparties: user.counterparties,
            profile,
        }))
    }

    pub async fn all_doctors(&self) -> GatewayResult<Vec<Doctor>> {
        self.read_list(methods::GET_ALL_DOCTORS, vec![]).await
    }

    pub async fn all_patients(&self) -> GatewayResult<Vec<Patient>> {
        self.read_list(methods::GET_ALL_PATIENTS, vec![]).await
    }

    /// Every doctor and patient except `exclude`, compared case-insensitively.
    ///
    /// Both directory reads are in flight together and both finish before this
    /// returns. Records of the other role come first; a caller with no role
    /// gets doctors first. Order otherwise follows the ledger.
    #[instrument(skip_all, fields(?role, exclude = %exclude))]
    pub async fn list_counterparties(
        &self,
        role: Role,
        exclude: &Address,
    ) -> GatewayResult<Vec<Participant>> {
        let (doctors, patients) = futures::join!(self.all_doctors(), self.all_patients());
        let doctors = doctors?.into_iter().map(Participant::Doctor);
        let patients = patients?.into_iter().map(Participant::Patient);

        let ordered: Vec<Participant> = match role {
            Role::Doctor => patients.chain(doctors).collect(),
            Role::Patient | Role::None => doctors.chain(patients).collect(),
        };
        Ok(ordered
            .into_iter()
            .filter(|p| p.address() != exclude)
            .collect())
    }

    /// [`Gateway::list_counterparties`] with metadata-derived labels.
    pub async fn counterparty_cards(
        &self,
        role: Role,
        exclude: &Address,
    ) -> GatewayResult<Vec<ParticipantCard>> {
        let participants = self.list_counterparties(role, exclude).await?;
        let refs = participants
            .iter()
            .map(|p| ((p.role(), p.id()), p.metadata_ref().to_string()))
            .collect();
        let metadata = self.resolve_metadata_batch(refs).await;
        Ok(participant_cards(participants, &metadata))
    }

    /// Fetches and parses the blob behind a metadata reference.
    ///
    /// Any failure is logged and becomes `None`; metadata never decides
    /// whether a record is usable.
    pub async fn resolve_metadata(&self, reference: &str) -> Option<Value> {
        match self.fetch_metadata(reference).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(reference, error = %err, "metadata unavailable");
                None
            }
        }
    }

    async fn fetch_metadata(&self, reference: &str) -> Result<Value, BlobError> {
        let cid = content_id_from_ref(&self.settings.metadata_base, reference)
            .ok_or_else(|| BlobError::BadReference(reference.to_string()))?;
        let bytes = self.blobs.get(&cid).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Resolves many references at once. Results are keyed by the caller's
    /// key, since completions arrive in no particular order.
    pub async fn resolve_metadata_batch<K>(&self, refs: Vec<(K, String)>) -> HashMap<K, Option<Value>>
    where
        K: Eq + Hash,
    {
        join_all(refs.into_iter().map(|(key, reference)| async move {
            let meta = self.resolve_metadata(&reference).await;
            (key, meta)
        }))
        .await
        .into_iter()
        .collect()
    }

    /// All patients with their contact lists.
    pub async fn patients_with_contacts(&self) -> GatewayResult<Vec<PatientContacts>> {
        let patients = self.all_patients().await?;
        let users = try_join_all(patients.iter().map(|p| self.user(&p.address))).await?;
        Ok(patients
            .into_iter()
            .zip(users)
            .map(|(patient, user)| PatientContacts {
                patient,
                contacts: user.map(|u| u.counterparties).unwrap_or_default(),
            })
            .collect())
    }

    pub async fn medicine(&self, id: u64) -> GatewayResult<Option<Medicine>> {
        self.read_record(methods::GET_MEDICINE, vec![arg_uint(id)]).await
    }

    pub async fn list_medicines(&self) -> GatewayResult<Vec<Medicine>> {
        self.read_list(methods::GET_ALL_MEDICINES, vec![]).await
    }

    pub async fn medicine_cards(&self) -> GatewayResult<Vec<MedicineCard>> {
        let medicines = self.list_medicines().await?;
        let refs = medicines
            .iter()
            .map(|m| (m.id, m.metadata_ref.clone()))
            .collect();
        let metadata = self.resolve_metadata_batch(refs).await;
        Ok(medicines
            .into_iter()
            .map(|m| {
                let meta = metadata.get(&m.id).and_then(Option::as_ref);
                MedicineCard::new(m, meta)
            })
            .collect())
    }

    /// Medicines the patient has bought, one entry per purchase. Each distinct
    /// medicine is read once.
    pub async fn patient_orders(&self, patient_id: u64) -> GatewayResult<Vec<Medicine>> {
        let Some(patient) = self.patient(patient_id).await? else {
            return Ok(Vec::new());
        };
        let mut distinct = patient.bought_medicines.clone();
        distinct.sort_unstable();
        distinct.dedup();

        let fetched = try_join_all(distinct.iter().map(|id| self.medicine(*id))).await?;
        let by_id: HashMap<u64, Medicine> = distinct
            .into_iter()
            .zip(fetched)
            .filter_map(|(id, m)| m.map(|m| (id, m)))
            .collect();

        Ok(patient
            .bought_medicines
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect())
    }

    pub async fn appointment(&self, id: u64) -> GatewayResult<Option<Appointment>> {
        self.read_record(methods::GET_APPOINTMENT, vec![arg_uint(id)]).await
    }

    pub async fn patient_appointments(&self, patient_id: u64) -> GatewayResult<Vec<Appointment>> {
        self.read_list(methods::GET_PATIENT_APPOINTMENTS, vec![arg_uint(patient_id)])
            .await
    }

    pub async fn doctor_appointments(&self, doctor_id: u64) -> GatewayResult<Vec<Appointment>> {
        self.read_list(methods::GET_DOCTOR_APPOINTMENTS, vec![arg_uint(doctor_id)])
            .await
    }

    pub async fn patient_prescriptions(&self, patient_id: u64) -> GatewayResult<Vec<Prescription>> {
        self.read_list(methods::GET_PATIENT_PRESCRIPTIONS, vec![arg_uint(patient_id)])
            .await
    }

    pub async fn doctor_prescriptions(&self, doctor_id: u64) -> GatewayResult<Vec<Prescription>> {
        self.read_list(methods::GET_DOCTOR_PRESCRIPTIONS, vec![arg_uint(doctor_id)])
            .await
    }

    /// Messages between two addresses, oldest first.
    pub async fn conversation(&self, a: &Address, b: &Address) -> GatewayResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .read_list(methods::READ_MESSAGES, vec![arg_address(a), arg_address(b)])
            .await?;
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }
}

fn dangling(operation: &'static str, role: &str, address: &Address) -> GatewayError {
    GatewayError::decode(
        operation,
        format!("{address} is registered as a {role} but has no {role} record"),
    )
}
