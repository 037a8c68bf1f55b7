//! In-process ledger with the marketplace contract's rules.
//!
//! Calls are serialized through one lock, the same guarantee the deployed
//! ledger gives. Transactions execute when submitted; their receipts become
//! visible after the configured confirmation delay, so a caller that gives up
//! waiting can still see the effect land later.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::LedgerFault;
use crate::ledger::{Ledger, Receipt, ReceiptStatus, SignedCall, TxHandle, methods};
use crate::models::{Address, Role, discounted_total};
use crate::normalize::{normalize_number, normalize_u64, wrap_number};

struct UserEntry {
    name: String,
    role: Role,
    friends: Vec<(Address, String)>,
}

struct DoctorEntry {
    ipfs_url: String,
    address: Address,
    appointment_count: u64,
    successful_treatment_count: u64,
    is_approved: bool,
}

struct PatientEntry {
    ipfs_url: String,
    medical_history: Vec<String>,
    address: Address,
    bought_medicines: Vec<u64>,
}

struct MedicineEntry {
    ipfs_url: String,
    price: u128,
    quantity: u64,
    discount: u64,
    location: String,
    active: bool,
}

struct AppointmentEntry {
    patient_id: u64,
    doctor_id: u64,
    date: u64,
    from: String,
    to: String,
    appointment_date: String,
    condition: String,
    message: String,
    is_open: bool,
}

struct PrescriptionEntry {
    medicine_id: u64,
    patient_id: u64,
    doctor_id: u64,
    date: u64,
}

struct MessageEntry {
    sender: Address,
    timestamp: u64,
    text: String,
}

struct PendingReceipt {
    receipt: Receipt,
    visible_at: Instant,
}

#[derive(Default)]
struct State {
    users: HashMap<Address, UserEntry>,
    doctors: Vec<DoctorEntry>,
    doctor_ids: HashMap<Address, u64>,
    patients: Vec<PatientEntry>,
    patient_ids: HashMap<Address, u64>,
    medicines: Vec<MedicineEntry>,
    appointments: Vec<AppointmentEntry>,
    prescriptions: Vec<PrescriptionEntry>,
    messages: HashMap<(String, String), Vec<MessageEntry>>,
    receipts: HashMap<TxHandle, PendingReceipt>,
    block: u64,
}

/// Fault and latency injection.
#[derive(Default)]
struct Controls {
    read_delays: HashMap<&'static str, Duration>,
    failing_reads: HashSet<&'static str>,
    confirmation_delay: Duration,
    refuse_submissions: Option<String>,
}

pub struct MemoryLedger {
    admin: Address,
    appointment_fee: u128,
    state: Mutex<State>,
    controls: Mutex<Controls>,
}

type Revert = String;

impl MemoryLedger {
    pub fn new(admin: impl Into<Address>) -> Self {
        MemoryLedger {
            admin: admin.into(),
            appointment_fee: 0,
            state: Mutex::new(State::default()),
            controls: Mutex::new(Controls::default()),
        }
    }

    pub fn with_appointment_fee(mut self, fee: u128) -> Self {
        self.appointment_fee = fee;
        self
    }

    pub fn admin(&self) -> &Address {
        &self.admin
    }

    /// Every call to `method` sleeps for `delay` before answering.
    pub async fn set_read_delay(&self, method: &'static str, delay: Duration) {
        self.controls.lock().await.read_delays.insert(method, delay);
    }

    /// Every call to `method` fails with a transport fault.
    pub async fn fail_reads(&self, method: &'static str) {
        self.controls.lock().await.failing_reads.insert(method);
    }

    /// Receipts stay invisible for `delay` after submission.
    pub async fn set_confirmation_delay(&self, delay: Duration) {
        self.controls.lock().await.confirmation_delay = delay;
    }

    /// Submissions are refused with `reason` until cleared with `None`.
    pub async fn refuse_submissions(&self, reason: Option<String>) {
        self.controls.lock().await.refuse_submissions = reason;
    }

    fn new_tx_handle() -> TxHandle {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        TxHandle(format!("0x{hex}"))
    }

    fn execute(&self, state: &mut State, signed: &SignedCall) -> Result<(), Revert> {
        let from = &signed.from;
        let args = &signed.call.args;
        let value = signed.call.value;
        match signed.call.method {
            methods::REGISTER_DOCTOR => {
                ensure_unregistered(state, from)?;
                let name = text_arg(args, 0)?;
                state.doctors.push(DoctorEntry {
                    ipfs_url: text_arg(args, 1)?,
                    address: from.clone(),
                    appointment_count: 0,
                    successful_treatment_count: 0,
                    is_approved: false,
                });
                let id = state.doctors.len() as u64;
                state.doctor_ids.insert(from.clone(), id);
                state.users.insert(from.clone(), UserEntry::new(name, Role::Doctor));
            }
            methods::REGISTER_PATIENT => {
                ensure_unregistered(state, from)?;
                let name = text_arg(args, 0)?;
                let history = args
                    .get(2)
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                state.patients.push(PatientEntry {
                    ipfs_url: text_arg(args, 1)?,
                    medical_history: history,
                    address: from.clone(),
                    bought_medicines: Vec::new(),
                });
                let id = state.patients.len() as u64;
                state.patient_ids.insert(from.clone(), id);
                state.users.insert(from.clone(), UserEntry::new(name, Role::Patient));
            }
            methods::APPROVE_DOCTOR => {
                self.ensure_admin(from)?;
                let doctor = doctor_mut(state, uint_arg(args, 0))?;
                if doctor.is_approved {
                    return Err("doctor already approved".into());
                }
                doctor.is_approved = true;
            }
            methods::BOOK_APPOINTMENT => {
                let patient_id = uint_arg(args, 0);
                let doctor_id = uint_arg(args, 1);
                ensure_patient_caller(state, from, patient_id)?;
                if !doctor_mut(state, doctor_id)?.is_approved {
                    return Err("doctor is not approved".into());
                }
                if value < self.appointment_fee {
                    return Err("insufficient appointment fee".into());
                }
                state.appointments.push(AppointmentEntry {
                    patient_id,
                    doctor_id,
                    date: now(),
                    from: text_arg(args, 2)?,
                    to: text_arg(args, 3)?,
                    appointment_date: text_arg(args, 4)?,
                    condition: text_arg(args, 5)?,
                    message: text_arg(args, 6)?,
                    is_open: true,
                });
                doctor_mut(state, doctor_id)?.appointment_count += 1;
            }
            methods::COMPLETE_APPOINTMENT => {
                let id = uint_arg(args, 0);
                let caller_doctor = state.doctor_ids.get(from).copied();
                let appt = index_mut(&mut state.appointments, id, "appointment")?;
                if caller_doctor != Some(appt.doctor_id) {
                    return Err("only the assigned doctor can complete".into());
                }
                if !appt.is_open {
                    return Err("appointment already completed".into());
                }
                appt.is_open = false;
                let doctor_id = appt.doctor_id;
                doctor_mut(state, doctor_id)?.successful_treatment_count += 1;
            }
            methods::ADD_FRIEND => {
                let other = Address::new(text_arg(args, 0)?);
                let name = text_arg(args, 1)?;
                if &other == from {
                    return Err("cannot add yourself".into());
                }
                let caller_name = registered(state, from)?.name.clone();
                registered(state, &other)?;
                let caller = state.users.get_mut(from).ok_or("caller not registered")?;
                if caller.friends.iter().any(|(a, _)| a == &other) {
                    return Err("already a contact".into());
                }
                caller.friends.push((other.clone(), name));
                if let Some(entry) = state.users.get_mut(&other) {
                    entry.friends.push((from.clone(), caller_name));
                }
            }
            methods::SEND_MESSAGE => {
                let to = Address::new(text_arg(args, 0)?);
                let text = text_arg(args, 1)?;
                if text.trim().is_empty() {
                    return Err("empty message".into());
                }
                registered(state, from)?;
                registered(state, &to)?;
                state
                    .messages
                    .entry(conversation_key(from, &to))
                    .or_default()
                    .push(MessageEntry {
                        sender: from.clone(),
                        timestamp: now(),
                        text,
                    });
            }
            methods::BUY_MEDICINE => {
                let patient_id = uint_arg(args, 0);
                let medicine_id = uint_arg(args, 1);
                let quantity = uint_arg(args, 2);
                ensure_patient_caller(state, from, patient_id)?;
                let medicine = index_mut(&mut state.medicines, medicine_id, "medicine")?;
                if !medicine.active {
                    return Err("medicine is not for sale".into());
                }
                if quantity == 0 {
                    return Err("quantity must be positive".into());
                }
                let remaining = medicine
                    .quantity
                    .checked_sub(quantity)
                    .ok_or("insufficient stock")?;
                let owed = discounted_total(medicine.price, quantity, medicine.discount as u8)
                    .ok_or("payment overflow")?;
                if value < owed {
                    return Err("insufficient payment".into());
                }
                medicine.quantity = remaining;
                index_mut(&mut state.patients, patient_id, "patient")?
                    .bought_medicines
                    .push(medicine_id);
            }
            methods::PRESCRIBE_MEDICINE => {
                let medicine_id = uint_arg(args, 0);
                let patient_id = uint_arg(args, 1);
                let doctor_id = approved_doctor(state, from)?;
                index_mut(&mut state.medicines, medicine_id, "medicine")?;
                index_mut(&mut state.patients, patient_id, "patient")?;
                state.prescriptions.push(PrescriptionEntry {
                    medicine_id,
                    patient_id,
                    doctor_id,
                    date: now(),
                });
            }
            methods::UPDATE_MEDICAL_HISTORY => {
                let patient_id = uint_arg(args, 0);
                let entry = text_arg(args, 1)?;
                let is_self = state.patient_ids.get(from) == Some(&patient_id);
                if !is_self {
                    approved_doctor(state, from)?;
                }
                index_mut(&mut state.patients, patient_id, "patient")?
                    .medical_history
                    .push(entry);
            }
            methods::ADD_MEDICINE => {
                self.ensure_admin(from)?;
                let discount = uint_arg(args, 3);
                if discount > 100 {
                    return Err("discount above 100%".into());
                }
                state.medicines.push(MedicineEntry {
                    ipfs_url: text_arg(args, 0)?,
                    price: args.get(1).map(normalize_number).unwrap_or(0),
                    quantity: uint_arg(args, 2),
                    discount,
                    location: text_arg(args, 4)?,
                    active: true,
                });
            }
            methods::UPDATE_MEDICINE_PRICE => {
                self.ensure_admin(from)?;
                let price = args.get(1).map(normalize_number).unwrap_or(0);
                index_mut(&mut state.medicines, uint_arg(args, 0), "medicine")?.price = price;
            }
            methods::UPDATE_MEDICINE_QUANTITY => {
                self.ensure_admin(from)?;
                let quantity = uint_arg(args, 1);
                index_mut(&mut state.medicines, uint_arg(args, 0), "medicine")?.quantity = quantity;
            }
            methods::UPDATE_MEDICINE_DISCOUNT => {
                self.ensure_admin(from)?;
                let discount = uint_arg(args, 1);
                if discount > 100 {
                    return Err("discount above 100%".into());
                }
                index_mut(&mut state.medicines, uint_arg(args, 0), "medicine")?.discount = discount;
            }
            methods::UPDATE_MEDICINE_LOCATION => {
                self.ensure_admin(from)?;
                let location = text_arg(args, 1)?;
                index_mut(&mut state.medicines, uint_arg(args, 0), "medicine")?.location = location;
            }
            methods::TOGGLE_MEDICINE_ACTIVE => {
                self.ensure_admin(from)?;
                let medicine = index_mut(&mut state.medicines, uint_arg(args, 0), "medicine")?;
                medicine.active = !medicine.active;
            }
            other => return Err(format!("unknown method {other}")),
        }
        Ok(())
    }

    fn ensure_admin(&self, from: &Address) -> Result<(), Revert> {
        if from == &self.admin {
            Ok(())
        } else {
            Err("only admin".into())
        }
    }

    fn query(&self, state: &State, method: &'static str, args: &[Value]) -> Result<Value, LedgerFault> {
        let value = match method {
            methods::GET_USER => {
                let who = Address::new(text_arg(args, 0).map_err(bad_arg)?);
                match state.users.get(&who) {
                    Some(u) => json!({
                        "name": u.name,
                        "userType": wrap_number(u128::from(u.role.code())),
                        "friendList": u.friends.iter()
                            .map(|(a, n)| json!({ "pubkey": a.as_str(), "name": n }))
                            .collect::<Vec<_>>(),
                    }),
                    None => json!({ "name": "", "userType": wrap_number(0), "friendList": [] }),
                }
            }
            methods::GET_DOCTOR_ID => {
                let who = Address::new(text_arg(args, 0).map_err(bad_arg)?);
                wrap_number(u128::from(state.doctor_ids.get(&who).copied().unwrap_or(0)))
            }
            methods::GET_PATIENT_ID => {
                let who = Address::new(text_arg(args, 0).map_err(bad_arg)?);
                wrap_number(u128::from(state.patient_ids.get(&who).copied().unwrap_or(0)))
            }
            methods::GET_DOCTOR => lookup(&state.doctors, uint_arg(args, 0), doctor_json),
            methods::GET_PATIENT => lookup(&state.patients, uint_arg(args, 0), patient_json),
            methods::GET_MEDICINE => lookup(&state.medicines, uint_arg(args, 0), medicine_json),
            methods::GET_APPOINTMENT => lookup(&state.appointments, uint_arg(args, 0), appointment_json),
            methods::GET_ALL_DOCTORS => all(&state.doctors, doctor_json),
            methods::GET_ALL_PATIENTS => all(&state.patients, patient_json),
            methods::GET_ALL_MEDICINES => all(&state.medicines, medicine_json),
            methods::GET_PATIENT_APPOINTMENTS => {
                let id = uint_arg(args, 0);
                filtered(&state.appointments, |a| a.patient_id == id, appointment_json)
            }
            methods::GET_DOCTOR_APPOINTMENTS => {
                let id = uint_arg(args, 0);
                filtered(&state.appointments, |a| a.doctor_id == id, appointment_json)
            }
            methods::GET_PATIENT_PRESCRIPTIONS => {
                let id = uint_arg(args, 0);
                filtered(&state.prescriptions, |p| p.patient_id == id, prescription_json)
            }
            methods::GET_DOCTOR_PRESCRIPTIONS => {
                let id = uint_arg(args, 0);
                filtered(&state.prescriptions, |p| p.doctor_id == id, prescription_json)
            }
            methods::READ_MESSAGES => {
                let a = Address::new(text_arg(args, 0).map_err(bad_arg)?);
                let b = Address::new(text_arg(args, 1).map_err(bad_arg)?);
                let msgs = state
                    .messages
                    .get(&conversation_key(&a, &b))
                    .map(|m| {
                        m.iter()
                            .map(|e| json!({
                                "sender": e.sender.as_str(),
                                "timestamp": wrap_number(u128::from(e.timestamp)),
                                "msg": e.text,
                            }))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                Value::Array(msgs)
            }
            other => return Err(LedgerFault::Unsupported(other.to_string())),
        };
        Ok(value)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn read(&self, method: &'static str, args: Vec<Value>) -> Result<Value, LedgerFault> {
        let (delay, failing) = {
            let controls = self.controls.lock().await;
            (
                controls.read_delays.get(method).copied(),
                controls.failing_reads.contains(method),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(LedgerFault::Transport(format!("{method}: connection reset")));
        }
        let state = self.state.lock().await;
        self.query(&state, method, &args)
    }

    async fn submit(&self, call: SignedCall) -> Result<TxHandle, LedgerFault> {
        let (delay, refusal) = {
            let controls = self.controls.lock().await;
            (controls.confirmation_delay, controls.refuse_submissions.clone())
        };
        if let Some(reason) = refusal {
            return Err(LedgerFault::Reverted { reason: Some(reason) });
        }
        if !WRITE_METHODS.contains(&call.call.method) {
            return Err(LedgerFault::Unsupported(call.call.method.to_string()));
        }

        let mut state = self.state.lock().await;
        // receipts nobody polled for are dropped once they are stale
        let now = Instant::now();
        state
            .receipts
            .retain(|_, p| now < p.visible_at + RECEIPT_RETENTION);
        let tx = Self::new_tx_handle();
        let status = match self.execute(&mut state, &call) {
            Ok(()) => ReceiptStatus::Success,
            Err(reason) => ReceiptStatus::Reverted { reason: Some(reason) },
        };
        state.block += 1;
        debug!(method = call.call.method, from = %call.from, %tx, ?status, "executed transaction");
        let receipt = Receipt {
            tx: tx.clone(),
            block: state.block,
            status,
        };
        state.receipts.insert(
            tx.clone(),
            PendingReceipt {
                receipt,
                visible_at: Instant::now() + delay,
            },
        );
        Ok(tx)
    }

    /// A visible receipt is handed out once and then dropped.
    async fn receipt(&self, tx: &TxHandle) -> Result<Option<Receipt>, LedgerFault> {
        let mut state = self.state.lock().await;
        let visible = state
            .receipts
            .get(tx)
            .is_some_and(|p| Instant::now() >= p.visible_at);
        if !visible {
            return Ok(None);
        }
        Ok(state.receipts.remove(tx).map(|p| p.receipt))
    }
}

const RECEIPT_RETENTION: Duration = Duration::from_secs(600);

const WRITE_METHODS: [&str; 16] = [
    methods::REGISTER_DOCTOR,
    methods::REGISTER_PATIENT,
    methods::BOOK_APPOINTMENT,
    methods::COMPLETE_APPOINTMENT,
    methods::SEND_MESSAGE,
    methods::ADD_FRIEND,
    methods::BUY_MEDICINE,
    methods::PRESCRIBE_MEDICINE,
    methods::APPROVE_DOCTOR,
    methods::UPDATE_MEDICAL_HISTORY,
    methods::ADD_MEDICINE,
    methods::UPDATE_MEDICINE_PRICE,
    methods::UPDATE_MEDICINE_QUANTITY,
    methods::UPDATE_MEDICINE_DISCOUNT,
    methods::UPDATE_MEDICINE_LOCATION,
    methods::TOGGLE_MEDICINE_ACTIVE,
];

impl UserEntry {
    fn new(name: String, role: Role) -> Self {
        UserEntry {
            name,
            role,
            friends: Vec::new(),
        }
    }
}

fn now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

fn conversation_key(a: &Address, b: &Address) -> (String, String) {
    let (a, b) = (a.canonical(), b.canonical());
    if a <= b { (a, b) } else { (b, a) }
}

fn bad_arg(reason: Revert) -> LedgerFault {
    LedgerFault::Reverted { reason: Some(reason) }
}

fn uint_arg(args: &[Value], idx: usize) -> u64 {
    args.get(idx).map(normalize_u64).unwrap_or(0)
}

fn text_arg(args: &[Value], idx: usize) -> Result<String, Revert> {
    args.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("argument {idx} must be a string"))
}

fn ensure_unregistered(state: &State, who: &Address) -> Result<(), Revert> {
    if state.users.contains_key(who) {
        Err("address already registered".into())
    } else {
        Ok(())
    }
}

fn registered<'a>(state: &'a State, who: &Address) -> Result<&'a UserEntry, Revert> {
    state.users.get(who).ok_or_else(|| format!("{who} is not registered"))
}

fn ensure_patient_caller(state: &State, from: &Address, patient_id: u64) -> Result<(), Revert> {
    if state.patient_ids.get(from) == Some(&patient_id) {
        Ok(())
    } else {
        Err("caller is not this patient".into())
    }
}

fn approved_doctor(state: &State, from: &Address) -> Result<u64, Revert> {
    let id = *state.doctor_ids.get(from).ok_or("caller is not a doctor")?;
    let approved = id
        .checked_sub(1)
        .and_then(|i| state.doctors.get(i as usize))
        .is_some_and(|d| d.is_approved);
    if approved { Ok(id) } else { Err("doctor is not approved".into()) }
}

fn index_mut<'a, T>(items: &'a mut [T], id: u64, what: &str) -> Result<&'a mut T, Revert> {
    id.checked_sub(1)
        .and_then(|i| items.get_mut(i as usize))
        .ok_or_else(|| format!("{what} {id} does not exist"))
}

fn doctor_mut(state: &mut State, id: u64) -> Result<&mut DoctorEntry, Revert> {
    index_mut(&mut state.doctors, id, "doctor")
}

fn lookup<T>(items: &[T], id: u64, to_json: fn(u64, &T) -> Value) -> Value {
    id.checked_sub(1)
        .and_then(|i| items.get(i as usize))
        .map(|item| to_json(id, item))
        .unwrap_or(Value::Null)
}

fn all<T>(items: &[T], to_json: fn(u64, &T) -> Value) -> Value {
    filtered(items, |_| true, to_json)
}

fn filtered<T>(items: &[T], keep: impl Fn(&T) -> bool, to_json: fn(u64, &T) -> Value) -> Value {
    Value::Array(
        items
            .iter()
            .enumerate()
            .filter(|(_, item)| keep(item))
            .map(|(i, item)| to_json(i as u64 + 1, item))
            .collect(),
    )
}

fn doctor_json(id: u64, d: &DoctorEntry) -> Value {
    json!({
        "id": wrap_number(u128::from(id)),
        "IPFS_URL": d.ipfs_url,
        "accountAddress": d.address.as_str(),
        "appointmentCount": wrap_number(u128::from(d.appointment_count)),
        "successfulTreatmentCount": wrap_number(u128::from(d.successful_treatment_count)),
        "isApproved": d.is_approved,
    })
}

fn patient_json(id: u64, p: &PatientEntry) -> Value {
    json!({
        "id": wrap_number(u128::from(id)),
        "IPFS_URL": p.ipfs_url,
        "medicalHistory": p.medical_history,
        "accountAddress": p.address.as_str(),
        "boughtMedicines": p.bought_medicines.iter()
            .map(|m| wrap_number(u128::from(*m)))
            .collect::<Vec<_>>(),
    })
}

fn medicine_json(id: u64, m: &MedicineEntry) -> Value {
    json!({
        "id": wrap_number(u128::from(id)),
        "IPFS_URL": m.ipfs_url,
        "price": wrap_number(m.price),
        "quantity": wrap_number(u128::from(m.quantity)),
        "discount": wrap_number(u128::from(m.discount)),
        "currentLocation": m.location,
        "active": m.active,
    })
}

fn appointment_json(id: u64, a: &AppointmentEntry) -> Value {
    json!({
        "id": wrap_number(u128::from(id)),
        "patientId": wrap_number(u128::from(a.patient_id)),
        "doctorId": wrap_number(u128::from(a.doctor_id)),
        "date": wrap_number(u128::from(a.date)),
        "from": a.from,
        "to": a.to,
        "appointmentDate": a.appointment_date,
        "condition": a.condition,
        "message": a.message,
        "isOpen": a.is_open,
    })
}

fn prescription_json(id: u64, p: &PrescriptionEntry) -> Value {
    json!({
        "id": wrap_number(u128::from(id)),
        "medicineId": wrap_number(u128::from(p.medicine_id)),
        "patientId": wrap_number(u128::from(p.patient_id)),
        "doctorId": wrap_number(u128::from(p.doctor_id)),
        "date": wrap_number(u128::from(p.date)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ContractCall, arg_address, arg_text, arg_uint};

    const ADMIN: &str = "0x00000000000000000000000000000000000000ad";
    const ALICE: &str = "0x00000000000000000000000000000000000000a1";

    async fn run(ledger: &MemoryLedger, from: &str, call: ContractCall) -> ReceiptStatus {
        let tx = ledger
            .submit(SignedCall {
                from: Address::new(from),
                call,
            })
            .await
            .unwrap();
        ledger.receipt(&tx).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn double_registration_reverts() {
        let ledger = MemoryLedger::new(ADMIN);
        let register = ContractCall::new(
            methods::REGISTER_PATIENT,
            vec![arg_text("Alice"), arg_text("ipfs://x"), json!([])],
        );
        assert_eq!(run(&ledger, ALICE, register.clone()).await, ReceiptStatus::Success);
        let upper = ALICE.to_ascii_uppercase().replace("0X", "0x");
        assert!(matches!(
            run(&ledger, &upper, register).await,
            ReceiptStatus::Reverted { .. }
        ));
    }

    #[tokio::test]
    async fn catalog_changes_are_admin_only() {
        let ledger = MemoryLedger::new(ADMIN);
        let add = ContractCall::new(
            methods::ADD_MEDICINE,
            vec![arg_text("ipfs://m"), arg_uint(10u64), arg_uint(5u64), arg_uint(0u64), arg_text("Accra")],
        );
        assert_eq!(
            run(&ledger, ALICE, add.clone()).await,
            ReceiptStatus::Reverted { reason: Some("only admin".into()) }
        );
        assert_eq!(run(&ledger, ADMIN, add).await, ReceiptStatus::Success);
        let toggle = ContractCall::new(methods::TOGGLE_MEDICINE_ACTIVE, vec![arg_uint(1u64)]);
        assert_eq!(run(&ledger, ADMIN, toggle).await, ReceiptStatus::Success);
        let med = ledger.read(methods::GET_MEDICINE, vec![arg_uint(1u64)]).await.unwrap();
        assert_eq!(med["active"], json!(false));
    }

    #[tokio::test]
    async fn unknown_methods_are_not_queued() {
        let ledger = MemoryLedger::new(ADMIN);
        let err = ledger
            .submit(SignedCall {
                from: Address::new(ALICE),
                call: ContractCall::new("selfDestruct", vec![]),
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerFault::Unsupported("selfDestruct".into()));
        assert!(matches!(
            ledger.read("getEverything", vec![]).await,
            Err(LedgerFault::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn unregistered_user_reads_as_zero_role() {
        let ledger = MemoryLedger::new(ADMIN);
        let user = ledger
            .read(methods::GET_USER, vec![arg_address(&Address::new(ALICE))])
            .await
            .unwrap();
        assert_eq!(normalize_number(&user["userType"]), 0);
        let missing = ledger.read(methods::GET_DOCTOR, vec![arg_uint(9u64)]).await.unwrap();
        assert!(missing.is_null());
    }

    #[tokio::test]
    async fn delivered_receipts_are_evicted() {
        let ledger = MemoryLedger::new(ADMIN);
        let tx = ledger
            .submit(SignedCall {
                from: Address::new(ALICE),
                call: ContractCall::new(
                    methods::REGISTER_DOCTOR,
                    vec![arg_text("Dr. A"), arg_text("ipfs://d")],
                ),
            })
            .await
            .unwrap();
        assert_eq!(ledger.state.lock().await.receipts.len(), 1);
        assert!(ledger.receipt(&tx).await.unwrap().is_some());
        assert!(ledger.state.lock().await.receipts.is_empty());
        assert!(ledger.receipt(&tx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receipts_respect_confirmation_delay() {
        let ledger = MemoryLedger::new(ADMIN);
        ledger.set_confirmation_delay(Duration::from_secs(3600)).await;
        let tx = ledger
            .submit(SignedCall {
                from: Address::new(ALICE),
                call: ContractCall::new(
                    methods::REGISTER_DOCTOR,
                    vec![arg_text("Dr. A"), arg_text("ipfs://d")],
                ),
            })
            .await
            .unwrap();
        assert!(ledger.receipt(&tx).await.unwrap().is_none());
    }
}
