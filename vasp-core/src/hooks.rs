//! The `BusinessContext` collaborator: the pluggable KYC/settlement logic
//! a VASP operator plugs into the protocol.

use std::future::Future;
use std::pin::Pin;

use crate::error::BusinessError;
use crate::payment::{KycData, PaymentObject};
use crate::status::Role;

/// A boxed, `Send` future, used so [`BusinessContext`] can be called
/// through a trait object despite async-trait methods not otherwise being
/// dyn-compatible.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Static information about a VASP counterparty, independent of any one
/// payment.
#[derive(Debug, Clone)]
pub struct VaspInfo {
    /// The counterparty's base URL for the off-chain API.
    pub base_url: String,
    /// A stable display name for logs.
    pub name: String,
}

/// The operator-supplied collaborator consulted while a payment
/// progresses through the status lattice.
///
/// Every method returns a boxed future so the trait remains object-safe
/// (`Arc<dyn BusinessContext>`), matching the pattern the HTTP transport
/// crate uses for its own facilitator trait.
pub trait BusinessContext: Send + Sync {
    /// Looks up static information about a counterparty VASP by address.
    fn vasp_info(&self, address: &str) -> BoxFuture<'_, Option<VaspInfo>>;

    /// Whether the local party plays `Role::Sender` or `Role::Receiver`
    /// for this payment.
    fn role(&self, payment: &PaymentObject) -> Role;

    /// Whether a locally-held account referenced by `payment` still
    /// exists and is usable.
    ///
    /// # Errors
    ///
    /// Returns [`BusinessError::NotAuthorized`] if the account cannot be
    /// used for this payment.
    fn check_account_existence<'a>(
        &'a self,
        payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<(), BusinessError>>;

    /// The next piece of KYC data (or recipient signature request) this
    /// party should attach to `payment`, if any.
    fn next_kyc_to_provide<'a>(
        &'a self,
        payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<Option<KycData>, BusinessError>>;

    /// Validates a recipient signature attached by the counterparty.
    ///
    /// # Errors
    ///
    /// Returns [`BusinessError::ValidationFailure`] if the signature does
    /// not validate.
    fn validate_recipient_signature<'a>(
        &'a self,
        payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<(), BusinessError>>;

    /// Whether this party now considers `payment` ready to settle.
    /// Returning `true` is a one-way door: the finality barrier in
    /// [`crate::status::StatusLattice`] then forbids unilaterally
    /// aborting.
    ///
    /// # Errors
    ///
    /// Returns [`BusinessError::ForceAbort`] if the payment should be
    /// aborted instead of progressed.
    fn ready_for_settlement<'a>(
        &'a self,
        payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<bool, BusinessError>>;

    /// Whether both sides having reached `ready_for_settlement` means this
    /// party now considers the payment settled (e.g. funds moved).
    ///
    /// # Errors
    ///
    /// Returns [`BusinessError::ForceAbort`] if settlement should not
    /// proceed after all.
    fn has_settled<'a>(
        &'a self,
        payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<bool, BusinessError>>;
}
