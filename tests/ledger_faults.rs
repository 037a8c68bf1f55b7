use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use medichain_gateway::ledger::methods;
use medichain_gateway::{
    Address, Gateway, GatewayError, GatewaySettings, Ledger, LedgerFault, MemoryBlobStore,
    Receipt, SessionSigner, SignedCall, TxHandle, WriteOp, WriteOutcome, WritePhase,
};

const DOCTOR: &str = "0xD0c70000000000000000000000000000000000aA";
const PATIENT: &str = "0xBa7E0000000000000000000000000000000000bB";
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Answers reads from a fixed table and fails submissions on demand.
#[derive(Default)]
struct ScriptedLedger {
    reads: HashMap<&'static str, Value>,
    submit_fault: Option<LedgerFault>,
    submissions: AtomicUsize,
}

impl ScriptedLedger {
    fn answering(mut self, method: &'static str, value: Value) -> Self {
        self.reads.insert(method, value);
        self
    }

    fn failing_submit(mut self, fault: LedgerFault) -> Self {
        self.submit_fault = Some(fault);
        self
    }
}

#[async_trait]
impl Ledger for ScriptedLedger {
    async fn read(&self, method: &'static str, _args: Vec<Value>) -> Result<Value, LedgerFault> {
        Ok(self.reads.get(method).cloned().unwrap_or(Value::Null))
    }

    async fn submit(&self, _call: SignedCall) -> Result<TxHandle, LedgerFault> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        match &self.submit_fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(TxHandle("0xfeed".into())),
        }
    }

    async fn receipt(&self, _tx: &TxHandle) -> Result<Option<Receipt>, LedgerFault> {
        Ok(None)
    }
}

fn gateway(ledger: Arc<ScriptedLedger>) -> Gateway {
    let settings = GatewaySettings {
        metadata_base: "https://gateway.test/ipfs".to_string(),
        confirmation_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
    };
    Gateway::new(ledger, Arc::new(MemoryBlobStore::new()), settings)
}

fn zeroed_medicine() -> Value {
    json!({
        "id": {"type": "BigNumber", "hex": "0x0"},
        "IPFS_URL": "",
        "price": {"type": "BigNumber", "hex": "0x0"},
        "quantity": {"type": "BigNumber", "hex": "0x0"},
        "discount": {"type": "BigNumber", "hex": "0x0"},
        "currentLocation": "",
        "active": false,
    })
}

fn zeroed_doctor() -> Value {
    json!({
        "id": {"type": "BigNumber", "hex": "0x0"},
        "IPFS_URL": "",
        "accountAddress": ZERO_ADDRESS,
        "appointmentCount": 0,
        "successfulTreatmentCount": 0,
        "isApproved": false,
    })
}

#[tokio::test]
async fn transport_fault_on_submit_is_not_retry_safe() {
    let ledger = Arc::new(
        ScriptedLedger::default()
            .failing_submit(LedgerFault::Transport("connection reset by peer".into())),
    );
    let gw = gateway(ledger.clone());
    let report = gw
        .execute(
            &SessionSigner::connected(PATIENT),
            WriteOp::PurchaseMedicine {
                patient_id: 1,
                medicine_id: 1,
                quantity: 1,
                payment: 10,
            },
        )
        .await;

    assert_eq!(
        report.phases,
        vec![WritePhase::Idle, WritePhase::Submitting, WritePhase::TimedOut]
    );
    assert!(matches!(
        &report.outcome,
        WriteOutcome::Unknown { reason } if reason.contains("connection reset by peer")
    ));
    assert!(!report.outcome.retry_safe());
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 1);
    assert!(matches!(
        report.into_result(),
        Err(GatewayError::WriteUnknown { operation, .. }) if operation == methods::BUY_MEDICINE
    ));
}

#[tokio::test]
async fn unsupported_method_on_submit_is_a_rejection() {
    let ledger = Arc::new(
        ScriptedLedger::default().failing_submit(LedgerFault::Unsupported("buyMedicine".into())),
    );
    let report = gateway(ledger)
        .execute(
            &SessionSigner::connected(PATIENT),
            WriteOp::ApproveDoctor { doctor_id: 1 },
        )
        .await;
    assert_eq!(report.outcome.phase(), WritePhase::Rejected);
    assert!(report.outcome.retry_safe());
}

#[tokio::test]
async fn zeroed_structs_read_as_absent() {
    let ledger = Arc::new(
        ScriptedLedger::default()
            .answering(methods::GET_MEDICINE, zeroed_medicine())
            .answering(methods::GET_DOCTOR, zeroed_doctor()),
    );
    let gw = gateway(ledger.clone());

    assert_eq!(gw.medicine(99).await.unwrap(), None);
    assert_eq!(gw.doctor(99).await.unwrap(), None);

    let err = gw
        .purchase_medicine(&SessionSigner::connected(PATIENT), 1, 99, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::WriteRejected { .. }));
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn doctor_role_without_id_is_a_decode_error() {
    let ledger = Arc::new(
        ScriptedLedger::default()
            .answering(
                methods::GET_USER,
                json!({"name": "Hopper", "userType": 1, "friendList": []}),
            )
            .answering(methods::GET_DOCTOR_ID, json!(0)),
    );
    let err = gateway(ledger)
        .resolve_identity(&Address::new(DOCTOR))
        .await
        .unwrap_err();
    match err {
        GatewayError::Decode { operation, .. } => assert_eq!(operation, methods::GET_DOCTOR_ID),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn doctor_id_without_record_is_a_decode_error() {
    let ledger = Arc::new(
        ScriptedLedger::default()
            .answering(
                methods::GET_USER,
                json!({"name": "Hopper", "userType": "1", "friendList": []}),
            )
            .answering(methods::GET_DOCTOR_ID, json!({"_hex": "0x4"}))
            .answering(methods::GET_DOCTOR, zeroed_doctor()),
    );
    let err = gateway(ledger)
        .resolve_identity(&Address::new(DOCTOR))
        .await
        .unwrap_err();
    match err {
        GatewayError::Decode { operation, .. } => assert_eq!(operation, methods::GET_DOCTOR),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn patient_role_without_record_is_a_decode_error() {
    let ledger = Arc::new(
        ScriptedLedger::default()
            .answering(
                methods::GET_USER,
                json!({"name": "Ada", "userType": 2, "friendList": []}),
            )
            .answering(methods::GET_PATIENT_ID, json!(3)),
    );
    let err = gateway(ledger)
        .resolve_identity(&Address::new(PATIENT))
        .await
        .unwrap_err();
    match err {
        GatewayError::Decode { operation, .. } => assert_eq!(operation, methods::GET_PATIENT),
        other => panic!("unexpected error {other}"),
    }
}
