//! The ledger RPC surface the gateway talks to.
//!
//! Method names and argument order are fixed by the deployed contract; the
//! [`methods`] table is the single place they are spelled out.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LedgerFault;
use crate::models::Address;
use crate::normalize::wrap_number;

pub mod methods {
    // reads
    pub const GET_USER: &str = "getUser";
    pub const GET_DOCTOR_ID: &str = "getDoctorId";
    pub const GET_DOCTOR: &str = "getDoctor";
    pub const GET_PATIENT_ID: &str = "getPatientId";
    pub const GET_PATIENT: &str = "getPatient";
    pub const GET_ALL_DOCTORS: &str = "getAllDoctors";
    pub const GET_ALL_PATIENTS: &str = "getAllPatients";
    pub const GET_MEDICINE: &str = "getMedicine";
    pub const GET_ALL_MEDICINES: &str = "getAllMedicines";
    pub const GET_APPOINTMENT: &str = "getAppointment";
    pub const GET_PATIENT_APPOINTMENTS: &str = "getPatientAppointments";
    pub const GET_DOCTOR_APPOINTMENTS: &str = "getDoctorAppointments";
    pub const GET_PATIENT_PRESCRIPTIONS: &str = "getPatientPrescriptions";
    pub const GET_DOCTOR_PRESCRIPTIONS: &str = "getDoctorPrescriptions";
    pub const READ_MESSAGES: &str = "readMessages";

    // writes
    pub const REGISTER_DOCTOR: &str = "registerDoctor";
    pub const REGISTER_PATIENT: &str = "registerPatient";
    pub const BOOK_APPOINTMENT: &str = "bookAppointment";
    pub const COMPLETE_APPOINTMENT: &str = "completeAppointment";
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const ADD_FRIEND: &str = "addFriend";
    pub const BUY_MEDICINE: &str = "buyMedicine";
    pub const PRESCRIBE_MEDICINE: &str = "prescribeMedicine";
    pub const APPROVE_DOCTOR: &str = "approveDoctor";
    pub const UPDATE_MEDICAL_HISTORY: &str = "updatePatientMedicalHistory";
    pub const ADD_MEDICINE: &str = "addMedicine";
    pub const UPDATE_MEDICINE_PRICE: &str = "updateMedicinePrice";
    pub const UPDATE_MEDICINE_QUANTITY: &str = "updateMedicineQuantity";
    pub const UPDATE_MEDICINE_DISCOUNT: &str = "updateMedicineDiscount";
    pub const UPDATE_MEDICINE_LOCATION: &str = "updateMedicineLocation";
    pub const TOGGLE_MEDICINE_ACTIVE: &str = "toggleMedicineActive";
}

/// Handle for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An unsigned state-changing call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractCall {
    pub method: &'static str,
    pub args: Vec<Value>,
    /// Payment attached to the call, smallest unit.
    pub value: u128,
}

impl ContractCall {
    pub fn new(method: &'static str, args: Vec<Value>) -> Self {
        ContractCall {
            method,
            args,
            value: 0,
        }
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// A call the signer has authorised on behalf of `from`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedCall {
    pub from: Address,
    pub call: ContractCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: Option<String> },
}

/// Proof of inclusion for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub tx: TxHandle,
    pub block: u64,
    #[serde(flatten)]
    pub status: ReceiptStatus,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Runs a named read and returns its raw result. An absent record is a
    /// successful read of `null` or a zeroed struct, never a fault.
    async fn read(&self, method: &'static str, args: Vec<Value>) -> Result<Value, LedgerFault>;

    /// Queues a signed call. `Ok` means the ledger accepted it and a handle
    /// exists. `Reverted` and `Unsupported` mean nothing was queued; after a
    /// `Transport` fault the call may or may not have reached the ledger.
    async fn submit(&self, call: SignedCall) -> Result<TxHandle, LedgerFault>;

    /// `Ok(None)` while the transaction is not yet durably included.
    async fn receipt(&self, tx: &TxHandle) -> Result<Option<Receipt>, LedgerFault>;
}

pub fn arg_uint(n: impl Into<u128>) -> Value {
    wrap_number(n.into())
}

pub fn arg_address(address: &Address) -> Value {
    Value::String(address.as_str().to_string())
}

pub fn arg_text(s: impl Into<String>) -> Value {
    Value::String(s.into())
}
