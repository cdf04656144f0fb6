//! The transport collaborator: how a [`Channel`](crate::channel::Channel)'s
//! outbound frames actually reach a counterparty. Implemented concretely
//! by the `vasp-http` crate; kept here as a trait so `vasp-core` has no
//! networking dependency of its own.

use crate::address::Address;
use crate::error::ProtocolError;
use crate::hooks::BoxFuture;
use crate::wire::{CommandRequestObject, CommandResponseObject};

/// Sends a request to a counterparty VASP and awaits its response.
pub trait Transport: Send + Sync {
    /// Delivers `request` to `peer` and returns its response.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for connection-level failures; this is
    /// distinct from a command-level [`crate::wire::ResponseStatus::Failure`],
    /// which is a successful round trip carrying a rejection.
    fn send_request<'a>(
        &'a self,
        peer: &'a Address,
        request: &'a CommandRequestObject,
    ) -> BoxFuture<'a, Result<CommandResponseObject, ProtocolError>>;
}
