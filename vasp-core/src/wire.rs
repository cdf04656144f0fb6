//! Request/response wire types exchanged between two VASPs.

use serde::{Deserialize, Serialize};

use crate::command::CommandKind;

/// Machine-readable error codes carried in an [`OffChainError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request or response frame did not parse.
    ParsingError,
    /// The request was well-formed JSON but violated the wire protocol
    /// itself (e.g. a client set `command_seq`).
    Malformed,
    /// A required field was missing from the request or command.
    Missing,
    /// This command's cid collides with an already-processed request
    /// whose command payload differs.
    Conflict,
    /// The server has a locally-originated request still awaiting a
    /// response and cannot accept new requests until it resolves.
    Wait,
    /// The command failed generic structural/executor validation.
    CommandValidationError,
    /// A payment actor's status transition was illegal under the status
    /// lattice.
    PaymentWrongStatus,
    /// A diff changed fields belonging to the non-originating actor.
    PaymentChangedOtherActor,
    /// The command's origin is not one of the two channel peers.
    PaymentWrongActor,
    /// The payment object failed structural validation.
    PaymentWrongStructure,
    /// The command depends on a version that is not currently live.
    PaymentDependencyError,
}

/// Severity of an [`OffChainError`], mirroring the reference
/// implementation's distinction between a failure specific to one command
/// and one that invalidates the whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Only the command that triggered this error is rejected.
    Command,
    /// The entire request is rejected.
    Protocol,
}

/// A structured error reported in a [`CommandResponseObject`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OffChainError {
    /// `command_error` or `protocol_error`.
    pub severity: ErrorSeverity,
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// The field path implicated, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A command proposed by the sender of this request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandRequestObject {
    /// Sequence number of this command within the channel, assigned by the
    /// proposer.
    pub seq: u64,
    /// The command identifier (duplicated from the command itself for
    /// quick retransmission matching).
    pub cid: String,
    /// The command's position in the bilaterally agreed sequence, set only
    /// by the server role. A client must never set this; a server that
    /// receives a request with this already set rejects it as malformed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_seq: Option<u64>,
    /// The command payload.
    pub command: CommandKind,
}

/// The outcome reported by the recipient of a [`CommandRequestObject`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandResponseObject {
    /// Echoes the request's command identifier.
    pub cid: String,
    /// `"success"` or `"failure"`.
    pub status: ResponseStatus,
    /// The position the command was given in the bilaterally agreed
    /// sequence, present on every non-`wait` response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_seq: Option<u64>,
    /// Present when `status` is `failure`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OffChainError>,
}

/// Whether a command was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The command was sequenced and committed.
    Success,
    /// The command was rejected; see the accompanying [`OffChainError`].
    Failure,
}

/// Builds a success response for `cid`, sequenced at `command_seq`.
#[must_use]
pub fn make_success_response(cid: impl Into<String>, command_seq: u64) -> CommandResponseObject {
    CommandResponseObject {
        cid: cid.into(),
        status: ResponseStatus::Success,
        command_seq: Some(command_seq),
        error: None,
    }
}

/// Builds a command-scoped failure response, still carrying the sequence
/// position the command was recorded at as a failure for audit purposes.
#[must_use]
pub fn make_command_error(
    cid: impl Into<String>,
    command_seq: Option<u64>,
    code: ErrorCode,
    field: Option<String>,
    message: impl Into<String>,
) -> CommandResponseObject {
    CommandResponseObject {
        cid: cid.into(),
        status: ResponseStatus::Failure,
        command_seq,
        error: Some(OffChainError {
            severity: ErrorSeverity::Command,
            code,
            field,
            message: Some(message.into()),
        }),
    }
}

/// Builds a request-scoped protocol failure response, not attributable to
/// a single command (e.g. `wait`, `malformed`, a duplicate `cid` conflict).
#[must_use]
pub fn make_protocol_error(cid: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> CommandResponseObject {
    CommandResponseObject {
        cid: cid.into(),
        status: ResponseStatus::Failure,
        command_seq: None,
        error: Some(OffChainError {
            severity: ErrorSeverity::Protocol,
            code,
            field: None,
            message: Some(message.into()),
        }),
    }
}

/// Builds a response for a request that failed to parse as JSON at all.
#[must_use]
pub fn make_parsing_error(message: impl Into<String>) -> CommandResponseObject {
    CommandResponseObject {
        cid: String::new(),
        status: ResponseStatus::Failure,
        command_seq: None,
        error: Some(OffChainError {
            severity: ErrorSeverity::Protocol,
            code: ErrorCode::ParsingError,
            field: None,
            message: Some(message.into()),
        }),
    }
}
