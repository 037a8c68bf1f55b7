//! Write orchestration.
//!
//! Each call submits exactly one ledger transaction and follows it to a
//! terminal phase:
//!
//! ```text
//! IDLE -> SUBMITTING -> PENDING_CONFIRMATION -> CONFIRMED | REJECTED | TIMED_OUT
//!                   \-> REJECTED   (signer or ledger refused; nothing queued)
//!                   \-> TIMED_OUT  (submission lost in transport; may have been queued)
//! ```
//!
//! A timed-out write is never resubmitted. Callers re-read whatever they need
//! once they have matched on the outcome.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::error::{BlobError, GatewayError, GatewayResult, LedgerFault};
use crate::gateway::Gateway;
use crate::ipfs::{ContentMetadata, gateway_url};
use crate::ledger::{ContractCall, Receipt, ReceiptStatus, TxHandle, arg_address, arg_text, arg_uint, methods};
use crate::models::Address;
use crate::signer::Signer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WritePhase {
    Idle,
    Submitting,
    PendingConfirmation,
    Confirmed,
    Rejected,
    TimedOut,
}

impl WritePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, WritePhase::Confirmed | WritePhase::Rejected | WritePhase::TimedOut)
    }

    pub fn can_advance_to(self, next: WritePhase) -> bool {
        use WritePhase::*;
        matches!(
            (self, next),
            (Idle, Submitting)
                | (Submitting, PendingConfirmation)
                | (Submitting, Rejected)
                | (Submitting, TimedOut)
                | (PendingConfirmation, Confirmed)
                | (PendingConfirmation, Rejected)
                | (PendingConfirmation, TimedOut)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal write transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: WritePhase,
    pub to: WritePhase,
}

/// Phase tracker for one write invocation.
#[derive(Debug, Clone)]
pub struct WriteMachine {
    trail: Vec<WritePhase>,
}

impl Default for WriteMachine {
    fn default() -> Self {
        WriteMachine {
            trail: vec![WritePhase::Idle],
        }
    }
}

impl WriteMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> WritePhase {
        self.trail.last().copied().unwrap_or(WritePhase::Idle)
    }

    pub fn advance(&mut self, next: WritePhase) -> Result<(), InvalidTransition> {
        let from = self.current();
        if !from.can_advance_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.trail.push(next);
        Ok(())
    }

    pub fn trail(&self) -> &[WritePhase] {
        &self.trail
    }

    fn into_trail(self) -> Vec<WritePhase> {
        self.trail
    }
}

/// Terminal state of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    Confirmed { receipt: Receipt },
    /// The ledger or signer refused. Nothing changed; resubmitting is safe.
    Rejected {
        reason: Option<String>,
        tx: Option<TxHandle>,
    },
    /// No confirmation within the bound. The transaction may still land.
    TimedOut { tx: TxHandle },
    /// The submission failed in transport, so no handle came back but the
    /// ledger may still have queued it.
    Unknown { reason: String },
}

impl WriteOutcome {
    pub fn phase(&self) -> WritePhase {
        match self {
            WriteOutcome::Confirmed { .. } => WritePhase::Confirmed,
            WriteOutcome::Rejected { .. } => WritePhase::Rejected,
            WriteOutcome::TimedOut { .. } | WriteOutcome::Unknown { .. } => WritePhase::TimedOut,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, WriteOutcome::Confirmed { .. })
    }

    /// Whether the caller may submit the same operation again without risk
    /// of applying it twice.
    pub fn retry_safe(&self) -> bool {
        matches!(self, WriteOutcome::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub operation: &'static str,
    pub phases: Vec<WritePhase>,
    #[serde(flatten)]
    pub outcome: WriteOutcome,
}

impl WriteReport {
    pub fn into_result(self) -> GatewayResult<Receipt> {
        match self.outcome {
            WriteOutcome::Confirmed { receipt } => Ok(receipt),
            WriteOutcome::Rejected { reason, .. } => Err(GatewayError::WriteRejected {
                operation: self.operation,
                reason,
            }),
            WriteOutcome::TimedOut { tx } => Err(GatewayError::WriteTimedOut {
                operation: self.operation,
                tx,
            }),
            WriteOutcome::Unknown { reason } => Err(GatewayError::WriteUnknown {
                operation: self.operation,
                reason,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MedicineChange {
    Price(u128),
    Quantity(u64),
    Discount(u8),
    Location(String),
    ToggleActive,
}

/// Every state-changing ledger operation the marketplace uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    RegisterDoctor {
        name: String,
        metadata_ref: String,
    },
    RegisterPatient {
        name: String,
        metadata_ref: String,
        medical_history: Vec<String>,
    },
    BookAppointment {
        patient_id: u64,
        doctor_id: u64,
        from: String,
        to: String,
        appointment_date: String,
        condition: String,
        message: String,
        fee: u128,
    },
    CompleteAppointment {
        appointment_id: u64,
    },
    SendMessage {
        to: Address,
        text: String,
    },
    AddCounterparty {
        address: Address,
        name: String,
    },
    PurchaseMedicine {
        patient_id: u64,
        medicine_id: u64,
        quantity: u64,
        payment: u128,
    },
    PrescribeMedicine {
        medicine_id: u64,
        patient_id: u64,
    },
    ApproveDoctor {
        doctor_id: u64,
    },
    UpdateMedicalHistory {
        patient_id: u64,
        entry: String,
    },
    AddMedicine {
        metadata_ref: String,
        price: u128,
        quantity: u64,
        discount_percent: u8,
        location: String,
    },
    UpdateMedicine {
        medicine_id: u64,
        change: MedicineChange,
    },
}

impl WriteOp {
    pub fn method(&self) -> &'static str {
        match self {
            WriteOp::RegisterDoctor { .. } => methods::REGISTER_DOCTOR,
            WriteOp::RegisterPatient { .. } => methods::REGISTER_PATIENT,
            WriteOp::BookAppointment { .. } => methods::BOOK_APPOINTMENT,
            WriteOp::CompleteAppointment { .. } => methods::COMPLETE_APPOINTMENT,
            WriteOp::SendMessage { .. } => methods::SEND_MESSAGE,
            WriteOp::AddCounterparty { .. } => methods::ADD_FRIEND,
            WriteOp::PurchaseMedicine { .. } => methods::BUY_MEDICINE,
            WriteOp::PrescribeMedicine { .. } => methods::PRESCRIBE_MEDICINE,
            WriteOp::ApproveDoctor { .. } => methods::APPROVE_DOCTOR,
            WriteOp::UpdateMedicalHistory { .. } => methods::UPDATE_MEDICAL_HISTORY,
            WriteOp::AddMedicine { .. } => methods::ADD_MEDICINE,
            WriteOp::UpdateMedicine { change, .. } => match change {
                MedicineChange::Price(_) => methods::UPDATE_MEDICINE_PRICE,
                MedicineChange::Quantity(_) => methods::UPDATE_MEDICINE_QUANTITY,
                MedicineChange::Discount(_) => methods::UPDATE_MEDICINE_DISCOUNT,
                MedicineChange::Location(_) => methods::UPDATE_MEDICINE_LOCATION,
                MedicineChange::ToggleActive => methods::TOGGLE_MEDICINE_ACTIVE,
            },
        }
    }

    /// Arguments in the ledger's declared order.
    pub fn into_call(self) -> ContractCall {
        let method = self.method();
        match self {
            WriteOp::RegisterDoctor { name, metadata_ref } => {
                ContractCall::new(method, vec![arg_text(name), arg_text(metadata_ref)])
            }
            WriteOp::RegisterPatient {
                name,
                metadata_ref,
                medical_history,
            } => ContractCall::new(
                method,
                vec![
                    arg_text(name),
                    arg_text(metadata_ref),
                    Value::Array(medical_history.into_iter().map(Value::String).collect()),
                ],
            ),
            WriteOp::BookAppointment {
                patient_id,
                doctor_id,
                from,
                to,
                appointment_date,
                condition,
                message,
                fee,
            } => ContractCall::new(
                method,
                vec![
                    arg_uint(patient_id),
                    arg_uint(doctor_id),
                    arg_text(from),
                    arg_text(to),
                    arg_text(appointment_date),
                    arg_text(condition),
                    arg_text(message),
                ],
            )
            .with_value(fee),
            WriteOp::CompleteAppointment { appointment_id } => {
                ContractCall::new(method, vec![arg_uint(appointment_id)])
            }
            WriteOp::SendMessage { to, text } => {
                ContractCall::new(method, vec![arg_address(&to), arg_text(text)])
            }
            WriteOp::AddCounterparty { address, name } => {
                ContractCall::new(method, vec![arg_address(&address), arg_text(name)])
            }
            WriteOp::PurchaseMedicine {
                patient_id,
                medicine_id,
                quantity,
                payment,
            } => ContractCall::new(
                method,
                vec![arg_uint(patient_id), arg_uint(medicine_id), arg_uint(quantity)],
            )
            .with_value(payment),
            WriteOp::PrescribeMedicine {
                medicine_id,
                patient_id,
            } => ContractCall::new(method, vec![arg_uint(medicine_id), arg_uint(patient_id)]),
            WriteOp::ApproveDoctor { doctor_id } => ContractCall::new(method, vec![arg_uint(doctor_id)]),
            WriteOp::UpdateMedicalHistory { patient_id, entry } => {
                ContractCall::new(method, vec![arg_uint(patient_id), arg_text(entry)])
            }
            WriteOp::AddMedicine {
                metadata_ref,
                price,
                quantity,
                discount_percent,
                location,
            } => ContractCall::new(
                method,
                vec![
                    arg_text(metadata_ref),
                    arg_uint(price),
                    arg_uint(quantity),
                    arg_uint(discount_percent),
                    arg_text(location),
                ],
            ),
            WriteOp::UpdateMedicine { medicine_id, change } => {
                let id = arg_uint(medicine_id);
                let args = match change {
                    MedicineChange::Price(price) => vec![id, arg_uint(price)],
                    MedicineChange::Quantity(quantity) => vec![id, arg_uint(quantity)],
                    MedicineChange::Discount(discount) => vec![id, arg_uint(discount)],
                    MedicineChange::Location(location) => vec![id, arg_text(location)],
                    MedicineChange::ToggleActive => vec![id],
                };
                ContractCall::new(method, args)
            }
        }
    }
}

impl Gateway {
    /// Submits one operation and waits for its terminal phase.
    #[instrument(skip_all, fields(operation = op.method()))]
    pub async fn execute(&self, signer: &dyn Signer, op: WriteOp) -> WriteReport {
        let operation = op.method();
        let mut machine = WriteMachine::new();
        step(&mut machine, WritePhase::Submitting);

        let signed = match signer.sign(op.into_call()).await {
            Ok(signed) => signed,
            Err(err) => {
                warn!(operation, error = %err, "signer refused");
                return finish(
                    operation,
                    machine,
                    WriteOutcome::Rejected {
                        reason: Some(err.to_string()),
                        tx: None,
                    },
                );
            }
        };

        let tx = match self.ledger.submit(signed).await {
            Ok(tx) => tx,
            Err(fault) => {
                warn!(operation, error = %fault, "submission failed");
                let outcome = match fault {
                    LedgerFault::Reverted { reason } => WriteOutcome::Rejected { reason, tx: None },
                    other @ LedgerFault::Unsupported(_) => WriteOutcome::Rejected {
                        reason: Some(other.to_string()),
                        tx: None,
                    },
                    other @ LedgerFault::Transport(_) => WriteOutcome::Unknown {
                        reason: other.to_string(),
                    },
                };
                return finish(operation, machine, outcome);
            }
        };
        step(&mut machine, WritePhase::PendingConfirmation);
        info!(operation, %tx, "submitted");

        let outcome = match self.await_receipt(&tx).await {
            Some(Receipt {
                status: ReceiptStatus::Reverted { reason },
                ..
            }) => WriteOutcome::Rejected {
                reason,
                tx: Some(tx),
            },
            Some(receipt) => WriteOutcome::Confirmed { receipt },
            None => WriteOutcome::TimedOut { tx },
        };
        finish(operation, machine, outcome)
    }

    async fn await_receipt(&self, tx: &TxHandle) -> Option<Receipt> {
        let period = self.settings.poll_interval.max(Duration::from_millis(1));
        let poll = async {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match self.ledger.receipt(tx).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    // only the observation failed; keep waiting on the same handle
                    Err(fault) => warn!(%tx, error = %fault, "receipt poll failed"),
                }
            }
        };
        tokio::time::timeout(self.settings.confirmation_timeout, poll)
            .await
            .ok()
    }

    /// Buys `quantity` units, paying the discounted total computed from the
    /// medicine's current price.
    pub async fn purchase_medicine(
        &self,
        signer: &dyn Signer,
        patient_id: u64,
        medicine_id: u64,
        quantity: u64,
    ) -> GatewayResult<WriteReport> {
        let medicine = self
            .medicine(medicine_id)
            .await?
            .ok_or_else(|| GatewayError::WriteRejected {
                operation: methods::BUY_MEDICINE,
                reason: Some(format!("medicine {medicine_id} does not exist")),
            })?;
        let payment = medicine
            .purchase_total(quantity)
            .ok_or(GatewayError::Arithmetic {
                operation: methods::BUY_MEDICINE,
            })?;
        let op = WriteOp::PurchaseMedicine {
            patient_id,
            medicine_id,
            quantity,
            payment,
        };
        Ok(self.execute(signer, op).await)
    }

    /// Stores a JSON profile blob and returns the URL to embed as a
    /// record's metadata reference.
    pub async fn pin_profile(&self, profile: &Value, name: &str) -> GatewayResult<String> {
        let bytes = serde_json::to_vec(profile).map_err(BlobError::from)?;
        self.pin_bytes(bytes, ContentMetadata::json(name)).await
    }

    pub async fn pin_bytes(&self, bytes: Vec<u8>, meta: ContentMetadata) -> GatewayResult<String> {
        let cid = self.blobs.put(bytes, &meta).await?;
        Ok(gateway_url(&self.settings.metadata_base, &cid))
    }
}

fn step(machine: &mut WriteMachine, next: WritePhase) {
    if let Err(err) = machine.advance(next) {
        debug_assert!(false, "{err}");
        warn!(error = %err, "write machine out of sequence");
    }
}

fn finish(operation: &'static str, mut machine: WriteMachine, outcome: WriteOutcome) -> WriteReport {
    step(&mut machine, outcome.phase());
    match &outcome {
        WriteOutcome::Confirmed { receipt } => {
            info!(operation, tx = %receipt.tx, block = receipt.block, "confirmed")
        }
        WriteOutcome::Rejected { reason, .. } => {
            warn!(operation, reason = reason.as_deref().unwrap_or("none"), "rejected")
        }
        WriteOutcome::TimedOut { tx } => {
            warn!(operation, %tx, "confirmation timed out; not resubmitting")
        }
        WriteOutcome::Unknown { reason } => {
            warn!(operation, %reason, "submission outcome unknown; not resubmitting")
        }
    }
    WriteReport {
        operation,
        phases: machine.into_trail(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn machine_accepts_only_declared_transitions() {
        let mut m = WriteMachine::new();
        assert!(m.advance(WritePhase::Confirmed).is_err());
        m.advance(WritePhase::Submitting).unwrap();
        m.advance(WritePhase::PendingConfirmation).unwrap();
        m.advance(WritePhase::TimedOut).unwrap();
        assert!(m.current().is_terminal());
        let err = m.advance(WritePhase::Confirmed).unwrap_err();
        assert_eq!(err.from, WritePhase::TimedOut);
        assert_eq!(
            m.trail(),
            &[
                WritePhase::Idle,
                WritePhase::Submitting,
                WritePhase::PendingConfirmation,
                WritePhase::TimedOut
            ]
        );
    }

    #[test]
    fn purchase_call_carries_payment() {
        let call = WriteOp::PurchaseMedicine {
            patient_id: 1,
            medicine_id: 2,
            quantity: 3,
            payment: 99,
        }
        .into_call();
        assert_eq!(call.method, methods::BUY_MEDICINE);
        assert_eq!(call.args.len(), 3);
        assert_eq!(call.value, 99);
    }

    #[test]
    fn medicine_changes_map_to_their_own_methods() {
        let op = |change| WriteOp::UpdateMedicine { medicine_id: 4, change };
        assert_eq!(op(MedicineChange::Price(1)).method(), methods::UPDATE_MEDICINE_PRICE);
        assert_eq!(op(MedicineChange::ToggleActive).into_call().args.len(), 1);
        let location = op(MedicineChange::Location("Kano".into())).into_call();
        assert_eq!(location.args[1], json!("Kano"));
    }

    #[test]
    fn lost_submission_is_not_retry_safe() {
        let unknown = WriteOutcome::Unknown {
            reason: "connection reset".into(),
        };
        assert!(!unknown.retry_safe());
        assert_eq!(unknown.phase(), WritePhase::TimedOut);
        assert!(WritePhase::Submitting.can_advance_to(WritePhase::TimedOut));
        let report = WriteReport {
            operation: methods::BOOK_APPOINTMENT,
            phases: vec![],
            outcome: unknown,
        };
        assert!(matches!(
            report.into_result(),
            Err(GatewayError::WriteUnknown { .. })
        ));
    }

    #[test]
    fn only_rejections_are_retry_safe() {
        let rejected = WriteOutcome::Rejected { reason: None, tx: None };
        let timed_out = WriteOutcome::TimedOut {
            tx: TxHandle("0x1".into()),
        };
        assert!(rejected.retry_safe());
        assert!(!timed_out.retry_safe());

        let report = WriteReport {
            operation: methods::BUY_MEDICINE,
            phases: vec![],
            outcome: timed_out,
        };
        assert!(matches!(
            report.into_result(),
            Err(GatewayError::WriteTimedOut { .. })
        ));
    }
}
