//! The payment status lattice.
//!
//! Each actor (sender or receiver) progresses through a small, mostly
//! linear set of statuses. The lattice enforces two things: that a status
//! only ever moves along a legal edge for that actor's role, and a
//! *finality barrier* — once an actor has reached `ready_for_settlement`,
//! it may not unilaterally move to `abort` while its counterpart has not
//! aborted, since settlement past that point is assumed irreversible.

use serde::{Deserialize, Serialize};

use crate::error::PaymentLogicError;

/// A payment actor's position in the status lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No progress has been made yet.
    None,
    /// Waiting on KYC data from this actor.
    NeedsKycData,
    /// Waiting on a recipient signature (receiver-side only).
    NeedsRecipientSignature,
    /// This actor considers the payment ready to settle.
    ReadyForSettlement,
    /// This actor considers the payment settled.
    Settled,
    /// This actor has aborted the payment.
    Abort,
}

impl Status {
    /// A total order used only to decide "has this actor reached at least
    /// X" — `Abort` is intentionally not comparable by height and is
    /// handled as a special case by callers.
    #[must_use]
    pub const fn height(self) -> u8 {
        match self {
            Self::None => 0,
            Self::NeedsKycData => 1,
            Self::ReadyForSettlement => 2,
            Self::NeedsRecipientSignature => 3,
            Self::Settled => 4,
            Self::Abort => 0,
        }
    }
}

/// Which side of a payment an actor plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The paying actor. Passes through `NeedsRecipientSignature` as its
    /// final step before settlement.
    Sender,
    /// The receiving actor. Never passes through
    /// `NeedsRecipientSignature` — that status is sender-only.
    Receiver,
}

impl Role {
    fn legal_successors(self, from: Status) -> &'static [Status] {
        match (self, from) {
            (Role::Sender, Status::None) => &[Status::NeedsKycData, Status::Abort],
            (Role::Sender, Status::NeedsKycData) => &[Status::ReadyForSettlement, Status::Abort],
            (Role::Sender, Status::ReadyForSettlement) => &[Status::NeedsRecipientSignature, Status::Abort],
            (Role::Sender, Status::NeedsRecipientSignature) => &[Status::Settled, Status::Abort],
            (Role::Sender, Status::Settled | Status::Abort) => &[],

            (Role::Receiver, Status::None) => &[Status::NeedsKycData, Status::Abort],
            (Role::Receiver, Status::NeedsKycData) => &[Status::ReadyForSettlement, Status::Abort],
            (Role::Receiver, Status::ReadyForSettlement) => &[Status::Settled, Status::Abort],
            (Role::Receiver, Status::NeedsRecipientSignature) => &[],
            (Role::Receiver, Status::Settled | Status::Abort) => &[],
        }
    }
}

/// Enforces per-actor lattice edges and the cross-actor finality barrier.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusLattice;

impl StatusLattice {
    /// Validates a proposed status transition for one actor.
    ///
    /// `other_status` is the counterpart actor's current status, needed to
    /// evaluate the finality barrier.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentLogicError`] if:
    /// - `new_status` is not a successor of `old_status` for `role`, or
    /// - `old_status` is at or past `ready_for_settlement`, `new_status` is
    ///   `abort`, and `other_status` is not already `abort` (the finality
    ///   barrier).
    pub fn check_transition(
        role: Role,
        old_status: Status,
        new_status: Status,
        other_status: Status,
    ) -> Result<(), PaymentLogicError> {
        if old_status == new_status {
            return Ok(());
        }

        if old_status.height() >= Status::ReadyForSettlement.height()
            && new_status == Status::Abort
            && other_status != Status::Abort
        {
            return Err(PaymentLogicError::new(
                "cannot abort after reaching ready_for_settlement while the counterparty has not aborted",
            ));
        }

        if role.legal_successors(old_status).contains(&new_status) {
            Ok(())
        } else {
            Err(PaymentLogicError::new(format!(
                "{old_status:?} -> {new_status:?} is not a legal transition for {role:?}"
            )))
        }
    }

    /// Whether `role`, currently at `ready_for_settlement`, may move to
    /// `settled` given the counterpart's current status.
    ///
    /// The sender may settle once the receiver has reached
    /// `ready_for_settlement` or `settled`; the receiver may settle once
    /// the sender has reached `needs_recipient_signature` or `settled` —
    /// the sender's own last step before settling.
    #[must_use]
    pub fn can_settle(role: Role, other_status: Status) -> bool {
        match role {
            Role::Sender => matches!(other_status, Status::ReadyForSettlement | Status::Settled),
            Role::Receiver => matches!(other_status, Status::NeedsRecipientSignature | Status::Settled),
        }
    }

    /// Whether either actor has aborted, which makes the joint payment
    /// aborted regardless of the other actor's status.
    #[must_use]
    pub fn either_aborted(sender: Status, receiver: Status) -> bool {
        sender == Status::Abort || receiver == Status::Abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_passes_through_needs_recipient_signature_before_settling() {
        StatusLattice::check_transition(Role::Sender, Status::None, Status::NeedsKycData, Status::None)
            .unwrap();
        StatusLattice::check_transition(
            Role::Sender,
            Status::NeedsKycData,
            Status::ReadyForSettlement,
            Status::None,
        )
        .unwrap();
        StatusLattice::check_transition(
            Role::Sender,
            Status::ReadyForSettlement,
            Status::NeedsRecipientSignature,
            Status::ReadyForSettlement,
        )
        .unwrap();
        StatusLattice::check_transition(
            Role::Sender,
            Status::NeedsRecipientSignature,
            Status::Settled,
            Status::Settled,
        )
        .unwrap();
    }

    #[test]
    fn finality_barrier_blocks_unilateral_abort() {
        let err = StatusLattice::check_transition(
            Role::Sender,
            Status::ReadyForSettlement,
            Status::Abort,
            Status::ReadyForSettlement,
        );
        assert!(err.is_err());
    }

    #[test]
    fn finality_barrier_allows_mutual_abort() {
        StatusLattice::check_transition(
            Role::Sender,
            Status::ReadyForSettlement,
            Status::Abort,
            Status::Abort,
        )
        .unwrap();
    }

    #[test]
    fn receiver_never_needs_recipient_signature() {
        assert!(!Role::Receiver
            .legal_successors(Status::None)
            .contains(&Status::NeedsRecipientSignature));
        assert!(!Role::Receiver
            .legal_successors(Status::NeedsKycData)
            .contains(&Status::NeedsRecipientSignature));
        assert!(Role::Receiver.legal_successors(Status::NeedsRecipientSignature).is_empty());
    }

    #[test]
    fn rejects_direct_jump_from_none_to_ready_for_settlement() {
        assert!(StatusLattice::check_transition(
            Role::Sender,
            Status::None,
            Status::ReadyForSettlement,
            Status::None,
        )
        .is_err());
        assert!(StatusLattice::check_transition(
            Role::Receiver,
            Status::None,
            Status::ReadyForSettlement,
            Status::None,
        )
        .is_err());
    }
}
