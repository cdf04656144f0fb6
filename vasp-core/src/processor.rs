//! Payment status progression: validates incoming commands and drives the
//! local actor's status forward by consulting the
//! [`BusinessContext`](crate::hooks::BusinessContext) collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use crate::address::Address;
use crate::command::PaymentCommand;
use crate::error::{BusinessError, CoreError, PaymentLogicError};
use crate::hooks::BusinessContext;
use crate::payment::PaymentObject;
use crate::record::StructuredRecord;
use crate::status::{Role, Status, StatusLattice};

/// Validates and progresses [`PaymentCommand`]s for one channel.
///
/// Keeps an obligation table of commands whose asynchronous progression
/// (the `BusinessContext` calls in [`Self::payment_process_async`]) has not
/// yet produced, or ruled out, a follow-up command, so a crash between
/// committing a command and proposing its follow-up is recoverable via
/// [`Self::retry_open_obligations`]. The table is included in
/// [`crate::channel::ChannelSnapshot`] so it survives a restart.
pub struct PaymentProcessor {
    business: Arc<dyn BusinessContext>,
    obligations: HashMap<String, PaymentCommand>,
}

impl PaymentProcessor {
    /// Creates a processor backed by the given business collaborator.
    #[must_use]
    pub fn new(business: Arc<dyn BusinessContext>) -> Self {
        Self {
            business,
            obligations: HashMap::new(),
        }
    }

    /// Validates a brand-new payment (no prior version): the actor that did
    /// not propose it must start at [`Status::None`], and the object's own
    /// structural checks must pass.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the new payment is not a valid genesis
    /// state.
    fn check_new_payment(&self, payment: &PaymentObject, origin: &str) -> Result<(), CoreError> {
        let non_originator_status = if payment.sender.address == origin {
            payment.receiver.status
        } else {
            payment.sender.status
        };
        if non_originator_status != Status::None {
            return Err(PaymentLogicError::new(
                "the non-originating actor must start a new payment at status 'none'",
            )
            .into());
        }
        if payment.receiver.status == Status::NeedsRecipientSignature {
            return Err(PaymentLogicError::new(
                "the receiver must never hold needs_recipient_signature",
            )
            .into());
        }
        payment
            .custom_checks(&crate::record::Diff::new())
            .map_err(CoreError::from)
    }

    /// Validates an update from `old` to `new`: the diff must only touch
    /// fields belonging to `origin`'s own actor (write-once fields on that
    /// actor enforced via [`StructuredRecord::update`]), the other actor's
    /// record must be untouched, and the originating actor's status
    /// transition must be a legal [`StatusLattice`] edge.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the diff reaches outside the
    /// originating actor or its status transition is illegal.
    fn check_new_update(&self, old: &PaymentObject, new: &PaymentObject, origin: &str) -> Result<(), CoreError> {
        let origin_is_sender = old.sender.address == origin;
        let (origin_old, origin_new, other_old, other_new, origin_role) = if origin_is_sender {
            (&old.sender, &new.sender, &old.receiver, &new.receiver, Role::Sender)
        } else {
            (&old.receiver, &new.receiver, &old.sender, &new.sender, Role::Receiver)
        };

        if other_old != other_new {
            return Err(PaymentLogicError::changed_other_actor(
                "a command may only change fields belonging to its originating actor",
            )
            .into());
        }

        let diff = origin_old.diff_from(origin_new);
        origin_old.update(&diff).map_err(CoreError::from)?;

        StatusLattice::check_transition(origin_role, origin_old.status, origin_new.status, other_old.status)?;

        new.custom_checks(&crate::record::Diff::new())
            .map_err(CoreError::from)
    }

    /// Validates an incoming command: checks that its two payment actors
    /// are exactly the two channel peers and that its `origin` is one of
    /// them, then — for commands proposed by the counterparty — dispatches
    /// to [`Self::check_new_payment`] or [`Self::check_new_update`]
    /// depending on whether `previous` is known. Commands this side
    /// originated were already validated at proposal time and are not
    /// re-checked here.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the command fails validation.
    pub fn check_command(
        &self,
        command: &PaymentCommand,
        previous: Option<&PaymentObject>,
        local: &Address,
        other: &Address,
    ) -> Result<(), CoreError> {
        let local_encoded = local.encode();
        let other_encoded = other.encode();
        let sender_addr = &command.payment.sender.address;
        let receiver_addr = &command.payment.receiver.address;

        let parties_are_channel_peers = {
            let addrs = [sender_addr.as_str(), receiver_addr.as_str()];
            addrs.contains(&local_encoded.as_str())
                && addrs.contains(&other_encoded.as_str())
                && sender_addr != receiver_addr
        };
        if !parties_are_channel_peers {
            return Err(PaymentLogicError::wrong_actor(
                "payment actor addresses do not match the two channel peers",
            )
            .into());
        }
        if command.origin != local_encoded && command.origin != other_encoded {
            return Err(PaymentLogicError::wrong_actor(
                "command origin is not one of the two channel peers",
            )
            .into());
        }

        if command.origin != other_encoded {
            return Ok(());
        }

        match previous {
            None => self.check_new_payment(&command.payment, &command.origin),
            Some(old) => self.check_new_update(old, &command.payment, &command.origin),
        }
    }

    /// Runs the asynchronous progression rules against `payment`,
    /// returning the next version of the local actor's side, if the local
    /// actor's status should move forward.
    ///
    /// Progression order: if the counterparty has aborted, mirror the
    /// abort. Otherwise, while this actor is still below
    /// [`Status::ReadyForSettlement`], ask the business context for more
    /// KYC to attach and whether the payment is now ready to settle. A
    /// sender at [`Status::ReadyForSettlement`] next asks for the
    /// recipient's signature and advances to
    /// [`Status::NeedsRecipientSignature`]. Finally, once the
    /// counterparty has reached the status this actor's role requires for
    /// joint settlement (see [`StatusLattice::can_settle`]), ask whether
    /// this actor now considers the payment settled.
    ///
    /// # Errors
    ///
    /// Returns a [`BusinessError`] if the collaborator rejects the
    /// payment at any step.
    pub async fn payment_process_async(
        &self,
        payment: &PaymentObject,
    ) -> Result<PaymentObject, BusinessError> {
        let role = self.business.role(payment);
        let (local, other) = match role {
            Role::Sender => (&payment.sender, &payment.receiver),
            Role::Receiver => (&payment.receiver, &payment.sender),
        };

        let mut next = payment.clone();

        if other.status == Status::Abort {
            let local_mut = match role {
                Role::Sender => &mut next.sender,
                Role::Receiver => &mut next.receiver,
            };
            local_mut.status = Status::Abort;
            return Ok(next);
        }

        match local.status {
            Status::None | Status::NeedsKycData => {
                if let Some(kyc) = self.business.next_kyc_to_provide(payment).await? {
                    let local_mut = match role {
                        Role::Sender => &mut next.sender,
                        Role::Receiver => &mut next.receiver,
                    };
                    local_mut.kyc_data = Some(kyc);
                }
                match self.business.ready_for_settlement(payment).await {
                    Ok(true) => {
                        let local_mut = match role {
                            Role::Sender => &mut next.sender,
                            Role::Receiver => &mut next.receiver,
                        };
                        local_mut.status = Status::ReadyForSettlement;
                    }
                    Ok(false) => {}
                    Err(BusinessError::ForceAbort(reason)) => {
                        let local_mut = match role {
                            Role::Sender => &mut next.sender,
                            Role::Receiver => &mut next.receiver,
                        };
                        local_mut.status = Status::Abort;
                        return Err(BusinessError::ForceAbort(reason));
                    }
                    Err(other_err) => return Err(other_err),
                }
            }
            Status::ReadyForSettlement if role == Role::Sender => {
                self.business.validate_recipient_signature(payment).await?;
                next.sender.status = Status::NeedsRecipientSignature;
            }
            Status::ReadyForSettlement | Status::NeedsRecipientSignature => {
                if StatusLattice::can_settle(role, other.status) && self.business.has_settled(payment).await? {
                    let local_mut = match role {
                        Role::Sender => &mut next.sender,
                        Role::Receiver => &mut next.receiver,
                    };
                    local_mut.status = Status::Settled;
                }
            }
            Status::Settled | Status::Abort => {}
        }

        Ok(next)
    }

    /// Processes a sequenced command: runs progression, and if it produces
    /// a state change, returns a follow-up command carrying the new
    /// version. The command is tracked as an open obligation until this
    /// call returns.
    ///
    /// # Errors
    ///
    /// Returns a [`BusinessError`] if progression fails.
    pub async fn process_command_async(
        &mut self,
        command: PaymentCommand,
    ) -> Result<Option<PaymentCommand>, BusinessError> {
        self.obligations.insert(command.cid.clone(), command.clone());
        let result = self.progress_one(&command).await;
        self.obligations.remove(&command.cid);
        result
    }

    async fn progress_one(
        &self,
        command: &PaymentCommand,
    ) -> Result<Option<PaymentCommand>, BusinessError> {
        let progressed = self.payment_process_async(&command.payment).await?;
        if progressed == command.payment {
            return Ok(None);
        }
        let role = self.business.role(&command.payment);
        let origin = match role {
            Role::Sender => command.payment.sender.address.clone(),
            Role::Receiver => command.payment.receiver.address.clone(),
        };
        let mut next_payment = progressed;
        next_payment.shared = next_payment.shared.new_version();
        Ok(Some(PaymentCommand::new(
            format!("{}.follow", command.cid),
            origin,
            next_payment,
        )))
    }

    /// Re-runs progression for every command whose follow-up was not
    /// resolved before a crash, e.g. during startup recovery.
    ///
    /// # Errors
    ///
    /// Returns a [`BusinessError`] from the first obligation that fails
    /// to re-process; remaining obligations are left untouched so a
    /// caller can retry.
    pub async fn retry_open_obligations(&mut self) -> Result<Vec<PaymentCommand>, BusinessError> {
        let pending: Vec<PaymentCommand> = self.obligations.values().cloned().collect();
        let mut followups = Vec::new();
        for command in pending {
            if let Some(followup) = self.progress_one(&command).await? {
                followups.push(followup);
            }
            self.obligations.remove(&command.cid);
        }
        Ok(followups)
    }

    /// The number of obligations currently open.
    #[must_use]
    pub fn open_obligation_count(&self) -> usize {
        self.obligations.len()
    }

    /// A snapshot of the open obligation table, for inclusion in
    /// [`crate::channel::ChannelSnapshot`].
    #[must_use]
    pub fn obligations_snapshot(&self) -> HashMap<String, PaymentCommand> {
        self.obligations.clone()
    }

    /// Restores the obligation table from a loaded
    /// [`crate::channel::ChannelSnapshot`].
    pub fn restore_obligations(&mut self, obligations: HashMap<String, PaymentCommand>) {
        self.obligations = obligations;
    }
}
