//! Contract gateway for a healthcare marketplace.
//!
//! Reads and writes marketplace records held by a ledger contract, resolves
//! their off-ledger profile blobs, and drives every write through an explicit
//! confirmation state machine.

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ipfs;
pub mod ledger;
pub mod memory_ledger;
pub mod models;
pub mod normalize;
pub mod profile;
pub mod reads;
pub mod signer;
pub mod writes;

pub use config::GatewayConfig;
pub use error::{BlobError, ConfigError, GatewayError, GatewayResult, LedgerFault};
pub use gateway::{Gateway, GatewaySettings};
pub use ipfs::{BlobStore, ContentMetadata, IpfsBlobStore, MemoryBlobStore};
pub use ledger::{ContractCall, Ledger, Receipt, ReceiptStatus, SignedCall, TxHandle};
pub use memory_ledger::MemoryLedger;
pub use models::{
    Address, Appointment, AppointmentStatus, Counterparty, Doctor, Medicine, Message, Participant,
    Patient, Prescription, Role, UserRecord,
};
pub use reads::{Identity, PatientContacts};
pub use signer::{SessionSigner, Signer};
pub use writes::{MedicineChange, WriteMachine, WriteOp, WriteOutcome, WritePhase, WriteReport};
