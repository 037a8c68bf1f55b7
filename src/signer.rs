use async_trait::async_trait;

use crate::error::GatewayError;
use crate::ledger::{ContractCall, SignedCall};
use crate::models::Address;

/// The wallet session. The gateway never holds keys; it hands each call to
/// the signer and submits whatever comes back.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Option<Address>;

    fn is_connected(&self) -> bool {
        self.address().is_some()
    }

    async fn sign(&self, call: ContractCall) -> Result<SignedCall, GatewayError> {
        match self.address() {
            Some(from) if self.is_connected() => Ok(SignedCall { from, call }),
            _ => Err(GatewayError::Signer("wallet not connected".to_string())),
        }
    }
}

/// Session whose account is known from the request context; signing is done
/// by the ledger node the session is attached to.
#[derive(Debug, Clone, Default)]
pub struct SessionSigner {
    address: Option<Address>,
}

impl SessionSigner {
    pub fn connected(address: impl Into<Address>) -> Self {
        SessionSigner {
            address: Some(address.into()),
        }
    }

    pub fn disconnected() -> Self {
        SessionSigner::default()
    }
}

#[async_trait]
impl Signer for SessionSigner {
    fn address(&self) -> Option<Address> {
        self.address.clone().filter(|a| !a.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::methods;

    #[tokio::test]
    async fn disconnected_session_refuses_to_sign() {
        let signer = SessionSigner::disconnected();
        assert!(!signer.is_connected());
        let err = signer
            .sign(ContractCall::new(methods::SEND_MESSAGE, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Signer(_)));
    }

    #[tokio::test]
    async fn connected_session_stamps_sender() {
        let signer = SessionSigner::connected("0x00000000000000000000000000000000000000a1");
        let signed = signer
            .sign(ContractCall::new(methods::SEND_MESSAGE, vec![]))
            .await
            .unwrap();
        assert!(signed.from.matches("0x00000000000000000000000000000000000000A1"));
    }
}
