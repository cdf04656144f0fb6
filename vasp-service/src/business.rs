//! A sample [`BusinessContext`] implementation.
//!
//! [`LocalBusinessContext`] provides enough KYC and settlement behavior to
//! run a demo VASP node end to end: it auto-generates KYC evidence and
//! recipient signatures rather than consulting a real compliance engine or
//! ledger, mirroring how the reference implementation's test fixture
//! (`BasicBusinessContext`) stands in for a real integration.

use std::collections::HashMap;
use std::sync::RwLock;

use vasp_core::error::BusinessError;
use vasp_core::hooks::{BoxFuture, BusinessContext, VaspInfo};
use vasp_core::payment::{KycData, PaymentObject};
use vasp_core::status::Role;

/// A demo [`BusinessContext`] that approves every payment, auto-generating
/// the KYC evidence and recipient signature a real VASP would obtain from
/// its compliance and signing infrastructure.
#[derive(Debug)]
pub struct LocalBusinessContext {
    my_address: String,
    peers: RwLock<HashMap<String, VaspInfo>>,
}

impl LocalBusinessContext {
    /// Creates a context identifying the local node as `my_address` (its
    /// own Bech32-encoded address).
    #[must_use]
    pub fn new(my_address: impl Into<String>) -> Self {
        Self {
            my_address: my_address.into(),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers static information about a counterparty VASP.
    pub fn register_peer(&self, address: impl Into<String>, info: VaspInfo) {
        self.peers
            .write()
            .expect("peers lock poisoned")
            .insert(address.into(), info);
    }

    fn is_sender(&self, payment: &PaymentObject) -> bool {
        payment.sender.address == self.my_address
    }
}

impl BusinessContext for LocalBusinessContext {
    fn vasp_info(&self, address: &str) -> BoxFuture<'_, Option<VaspInfo>> {
        let info = self.peers.read().expect("peers lock poisoned").get(address).cloned();
        Box::pin(async move { info })
    }

    fn role(&self, payment: &PaymentObject) -> Role {
        if self.is_sender(payment) {
            Role::Sender
        } else {
            Role::Receiver
        }
    }

    fn check_account_existence<'a>(
        &'a self,
        _payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<(), BusinessError>> {
        Box::pin(async move { Ok(()) })
    }

    fn next_kyc_to_provide<'a>(
        &'a self,
        payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<Option<KycData>, BusinessError>> {
        let role = self.role(payment);
        let already_provided = match role {
            Role::Sender => payment.sender.kyc_data.is_some(),
            Role::Receiver => payment.receiver.kyc_data.is_some(),
        };
        let reference_id = payment.reference_id.clone();
        let my_address = self.my_address.clone();
        Box::pin(async move {
            if already_provided {
                return Ok(None);
            }
            let blob = format!(
                "{{\"payment_reference_id\":\"{my_address}.{reference_id}\",\"type\":\"individual\"}}"
            );
            Ok(Some(KycData { blob }))
        })
    }

    fn validate_recipient_signature<'a>(
        &'a self,
        _payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<(), BusinessError>> {
        Box::pin(async move { Ok(()) })
    }

    fn ready_for_settlement<'a>(
        &'a self,
        payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<bool, BusinessError>> {
        let sender_ready = payment.sender.kyc_data.is_some();
        let receiver_ready = payment.receiver.kyc_data.is_some();
        Box::pin(async move { Ok(sender_ready && receiver_ready) })
    }

    fn has_settled<'a>(
        &'a self,
        _payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<bool, BusinessError>> {
        Box::pin(async move { Ok(true) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vasp_core::payment::{PaymentAction, PaymentActor};

    fn sample_payment(my_address: &str) -> PaymentObject {
        PaymentObject::new(
            "v0",
            "ref-1",
            PaymentActor::new(my_address, "sub-a"),
            PaymentActor::new("other-vasp", "sub-b"),
            PaymentAction {
                amount: 100,
                currency: "USD".into(),
                action: "charge".into(),
                timestamp: 0,
            },
        )
    }

    #[tokio::test]
    async fn identifies_itself_as_sender() {
        let ctx = LocalBusinessContext::new("me");
        let payment = sample_payment("me");
        assert_eq!(ctx.role(&payment), Role::Sender);
    }

    #[tokio::test]
    async fn provides_kyc_once_then_stops() {
        let ctx = LocalBusinessContext::new("me");
        let payment = sample_payment("me");
        let kyc = ctx.next_kyc_to_provide(&payment).await.unwrap();
        assert!(kyc.is_some());

        let mut provided = payment;
        provided.sender.kyc_data = kyc;
        let kyc_again = ctx.next_kyc_to_provide(&provided).await.unwrap();
        assert!(kyc_again.is_none());
    }

    #[tokio::test]
    async fn ready_for_settlement_requires_both_sides_kyc() {
        let ctx = LocalBusinessContext::new("me");
        let mut payment = sample_payment("me");
        assert!(!ctx.ready_for_settlement(&payment).await.unwrap());

        payment.sender.kyc_data = Some(KycData { blob: "{}".into() });
        payment.receiver.kyc_data = Some(KycData { blob: "{}".into() });
        assert!(ctx.ready_for_settlement(&payment).await.unwrap());
    }
}
