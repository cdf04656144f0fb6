//! Protocol commands.
//!
//! The distilled protocol carries exactly one kind of command — a new or
//! updated payment object — so commands are a closed tagged enum rather
//! than a runtime type registry.

use serde::{Deserialize, Serialize};

use crate::payment::PaymentObject;
use crate::shared_object::Version;

/// Behaviour shared by every command the executor can sequence.
pub trait ProtocolCommand {
    /// A command identifier, unique within the channel that proposed it.
    fn cid(&self) -> &str;

    /// The versions of shared objects this command depends on. The
    /// executor refuses to commit a command whose dependencies are not
    /// all live.
    fn dependencies(&self) -> &[Version];

    /// The version this command creates, once committed.
    fn new_version(&self) -> &Version;
}

/// A command that creates or updates a [`PaymentObject`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentCommand {
    /// Unique identifier for this command, minted by its proposer.
    pub cid: String,
    /// The address of the VASP that proposed this command.
    pub origin: String,
    /// The resulting payment object.
    pub payment: PaymentObject,
}

impl PaymentCommand {
    /// Wraps a payment object as a command with the given identifier,
    /// proposed by `origin`.
    #[must_use]
    pub const fn new(cid: String, origin: String, payment: PaymentObject) -> Self {
        Self { cid, origin, payment }
    }
}

impl ProtocolCommand for PaymentCommand {
    fn cid(&self) -> &str {
        &self.cid
    }

    fn dependencies(&self) -> &[Version] {
        &self.payment.shared.previous_versions
    }

    fn new_version(&self) -> &Version {
        &self.payment.shared.version
    }
}

/// The closed set of command kinds this protocol exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command_type", rename_all = "snake_case")]
pub enum CommandKind {
    /// A payment command.
    Payment(PaymentCommand),
}

impl ProtocolCommand for CommandKind {
    fn cid(&self) -> &str {
        match self {
            Self::Payment(cmd) => cmd.cid(),
        }
    }

    fn dependencies(&self) -> &[Version] {
        match self {
            Self::Payment(cmd) => cmd.dependencies(),
        }
    }

    fn new_version(&self) -> &Version {
        match self {
            Self::Payment(cmd) => cmd.new_version(),
        }
    }
}

impl CommandKind {
    /// Returns the inner payment command, if this is one.
    #[must_use]
    pub const fn as_payment(&self) -> Option<&PaymentCommand> {
        match self {
            Self::Payment(cmd) => Some(cmd),
        }
    }
}
