//! The bilateral channel state machine: one [`Channel`] exists per
//! counterparty VASP and owns that counterparty's [`Executor`] and
//! [`PaymentProcessor`].
//!
//! Sequencing is asymmetric: one side of every channel is elected the
//! protocol's "server" and is the sole authority on where a command lands
//! in the channel's shared history (`command_seq`); the other side, the
//! "client", proposes commands without a position and learns its assigned
//! `command_seq` only from the server's response. This keeps both sides'
//! histories in lockstep without a distributed consensus round — see
//! [`Self::new`] for how the server role is elected and
//! [`Self::handle_request`]/[`Self::handle_response`] for how each side
//! applies the other's sequencing decisions.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::command::{CommandKind, ProtocolCommand};
use crate::error::{CoreError, ProtocolError};
use crate::executor::{CommandStatus, Executor, ExecutorSnapshot};
use crate::hooks::BusinessContext;
use crate::processor::PaymentProcessor;
use crate::wire::{
    make_command_error, make_protocol_error, make_success_response, CommandRequestObject,
    CommandResponseObject, ErrorCode, ResponseStatus,
};

/// How many responses to keep for idempotent retransmission. Past this,
/// the oldest cached response is evicted; a retransmit of a request older
/// than that is a protocol error rather than silently dropped, since the
/// peer should not still be retrying something this old.
const RESPONSE_CACHE_CAPACITY: usize = 128;

/// A pending outbound request awaiting acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Outbound {
    request: CommandRequestObject,
    attempts: u32,
}

/// One bilateral channel between the local VASP and a single counterparty.
pub struct Channel {
    local: Address,
    other: Address,
    is_server: bool,
    executor: Executor,
    processor: PaymentProcessor,
    next_outbound_seq: u64,
    outbound: VecDeque<Outbound>,
    other_requests: HashMap<String, CommandRequestObject>,
    response_cache: HashMap<String, CommandResponseObject>,
    response_cache_order: VecDeque<String>,
    /// Commands whose bilaterally agreed `command_seq` is known but which
    /// are not yet contiguous with this side's local history, keyed by
    /// that `command_seq`. Drained as gaps close.
    pending_remote_commits: BTreeMap<u64, CommandRequestObject>,
}

impl Channel {
    /// Opens a channel to `other`, electing which side plays the
    /// protocol's server role.
    ///
    /// The server is whichever side wins `last_bit(self) xor last_bit(other)`:
    /// when the two addresses' last on-chain bits agree, the
    /// lexicographically greater on-chain address is server; when they
    /// disagree, the lexicographically lesser one is. This (rather than a
    /// plain address comparison) keeps the server role from always landing
    /// on the same side of an address-space split. Ties are impossible
    /// since two VASPs never share an on-chain address.
    #[must_use]
    pub fn new(local: Address, other: Address, business: Arc<dyn BusinessContext>) -> Self {
        let is_server = elect_server(&local, &other);
        #[cfg(feature = "telemetry")]
        tracing::info!(peer = %other, is_server, "channel opened, server role elected");
        Self {
            local,
            other,
            is_server,
            executor: Executor::new(),
            processor: PaymentProcessor::new(business),
            next_outbound_seq: 0,
            outbound: VecDeque::new(),
            other_requests: HashMap::new(),
            response_cache: HashMap::new(),
            response_cache_order: VecDeque::new(),
            pending_remote_commits: BTreeMap::new(),
        }
    }

    /// Whether the local party plays the server role in this channel.
    #[must_use]
    pub const fn is_server(&self) -> bool {
        self.is_server
    }

    /// This channel's counterparty address.
    #[must_use]
    pub const fn peer(&self) -> &Address {
        &self.other
    }

    /// Read-only access to the channel's executor, e.g. for inspecting
    /// committed history.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Read-write access to the payment processor, for driving
    /// asynchronous progression after a command commits.
    pub const fn processor_mut(&mut self) -> &mut PaymentProcessor {
        &mut self.processor
    }

    /// Proposes a new command locally: validates it against the current
    /// head of its dependency chain, and either sequences it immediately
    /// (if the local side is server) or leaves its position unassigned
    /// until the server's response arrives (if the local side is client).
    /// The request is queued for retransmission until acknowledged.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the command fails validation, cannot be
    /// sequenced, or if a previously proposed local command is still
    /// awaiting a response (only one local proposal may be outstanding at
    /// a time).
    pub fn sequence_command_local(&mut self, command: CommandKind) -> Result<CommandRequestObject, CoreError> {
        if !self.outbound.is_empty() {
            return Err(ProtocolError::new("wait")
                .with_message("a locally-originated request is still awaiting a response")
                .into());
        }

        let CommandKind::Payment(payment_cmd) = &command;
        let previous = self.previous_object(payment_cmd.dependencies());
        self.processor
            .check_command(payment_cmd, previous.as_ref(), &self.local, &self.other)?;

        let command_seq = if self.is_server {
            let seq = self.executor.sequence_next_command(command.clone(), false)?;
            self.executor
                .set_success(seq)
                .expect("just-sequenced command always has a valid index");
            Some(seq as u64)
        } else {
            None
        };

        let seq = self.next_outbound_seq;
        self.next_outbound_seq += 1;
        let request = CommandRequestObject {
            seq,
            cid: command.cid().to_string(),
            command_seq,
            command,
        };
        self.outbound.push_back(Outbound {
            request: request.clone(),
            attempts: 0,
        });
        #[cfg(feature = "telemetry")]
        tracing::debug!(
            peer = %self.other,
            cid = %request.cid,
            is_server = self.is_server,
            command_seq = ?request.command_seq,
            "sequenced local command"
        );
        Ok(request)
    }

    fn previous_object(&self, deps: &[String]) -> Option<crate::payment::PaymentObject> {
        let dep = deps.first()?;
        for idx in 0..self.executor.len() {
            if let Some(CommandKind::Payment(cmd)) = self.executor.get(idx) {
                if cmd.payment.shared.version == *dep {
                    return Some(cmd.payment.clone());
                }
            }
        }
        None
    }

    /// Handles an incoming request from the counterparty.
    ///
    /// Order of checks: a repeated `cid` is answered from cache (or
    /// rejected as a `conflict` if its payload differs from what was
    /// cached under that `cid`); a client-sent `command_seq` or a missing
    /// server-assigned one is `malformed`; a locally-originated request
    /// still awaiting its own response makes this side reply `wait`.
    /// Otherwise the command is validated and sequenced — as server, at
    /// the local executor's current position; as client, at the position
    /// the server assigned, buffering it if it arrives ahead of this
    /// side's own history.
    pub fn handle_request(&mut self, request: CommandRequestObject) -> CommandResponseObject {
        #[cfg(feature = "telemetry")]
        tracing::debug!(peer = %self.other, cid = %request.cid, command_seq = ?request.command_seq, "received request");

        if let Some(cached) = self.response_cache.get(&request.cid) {
            if self.other_requests.get(&request.cid) == Some(&request) {
                return cached.clone();
            }
            return make_protocol_error(
                request.cid,
                ErrorCode::Conflict,
                "this cid was already used with a different request",
            );
        }

        if self.is_server {
            if request.command_seq.is_some() {
                return make_protocol_error(
                    request.cid,
                    ErrorCode::Malformed,
                    "a client must not set command_seq",
                );
            }
        } else if request.command_seq.is_none() {
            return make_protocol_error(
                request.cid,
                ErrorCode::Malformed,
                "the server must assign command_seq before sending a request",
            );
        }

        if !self.outbound.is_empty() {
            #[cfg(feature = "telemetry")]
            tracing::debug!(peer = %self.other, cid = %request.cid, "asking peer to wait on our own outstanding proposal");
            return make_protocol_error(
                request.cid,
                ErrorCode::Wait,
                "a locally-originated request is still awaiting a response",
            );
        }

        let response = if self.is_server {
            self.sequence_and_classify(&request)
        } else {
            self.apply_server_assigned(request.clone())
        };

        self.cache_response(request, response.clone());
        response
    }

    /// Validates and sequences `request`'s command at the executor's
    /// current position, classifying the result as success or failure.
    /// Used both by the server processing a client's proposal and by the
    /// client catching up to a server-assigned `command_seq` that matches
    /// its current position. Peer-originated commands are always
    /// sequenced with `allow_sequence_errors = true`, so a failure is
    /// still recorded at a definite position both sides can agree on.
    fn sequence_and_classify(&mut self, request: &CommandRequestObject) -> CommandResponseObject {
        let CommandKind::Payment(payment_cmd) = &request.command;
        let previous = self.previous_object(payment_cmd.dependencies());
        let check_result =
            self.processor
                .check_command(payment_cmd, previous.as_ref(), &self.local, &self.other);

        let seq = self
            .executor
            .sequence_next_command(request.command.clone(), true)
            .expect("allow_sequence_errors=true never errors");

        match (self.executor.status(seq).cloned(), check_result) {
            (Some(CommandStatus::Failure(reason)), _) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(peer = %self.other, cid = %request.cid, %reason, "command rejected: dependency not live");
                make_command_error(
                    request.cid.clone(),
                    Some(seq as u64),
                    ErrorCode::PaymentDependencyError,
                    None,
                    reason,
                )
            }
            (_, Err(err)) => {
                self.executor
                    .set_fail(seq, err.to_string())
                    .expect("just-sequenced command always has a valid index");
                #[cfg(feature = "telemetry")]
                tracing::warn!(peer = %self.other, cid = %request.cid, "command rejected: {err}");
                make_command_error(request.cid.clone(), Some(seq as u64), err.wire_code(), None, err.to_string())
            }
            (_, Ok(())) => {
                self.executor
                    .set_success(seq)
                    .expect("just-sequenced command always has a valid index");
                make_success_response(request.cid.clone(), seq as u64)
            }
        }
    }

    /// Applies a request whose `command_seq` the server has already
    /// assigned: replays the cached outcome if it is behind this side's
    /// history, sequences it if it is exactly next, or buffers it if it
    /// arrived ahead of a gap still to be filled.
    fn apply_server_assigned(&mut self, request: CommandRequestObject) -> CommandResponseObject {
        let command_seq = request.command_seq.expect("checked by caller");
        match (command_seq as usize).cmp(&self.executor.len()) {
            Ordering::Less => self.executor.status(command_seq as usize).map_or_else(
                || make_protocol_error(request.cid.clone(), ErrorCode::Malformed, "command_seq refers to unknown history"),
                |status| status_to_response(&request.cid, command_seq, status),
            ),
            Ordering::Greater => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(peer = %self.other, cid = %request.cid, command_seq, "buffering out-of-order command_seq");
                self.pending_remote_commits.insert(command_seq, request.clone());
                make_protocol_error(
                    request.cid,
                    ErrorCode::Wait,
                    "waiting to catch up to an earlier command_seq",
                )
            }
            Ordering::Equal => {
                let response = self.sequence_and_classify(&request);
                self.drain_pending_remote_commits();
                response
            }
        }
    }

    /// Applies any buffered requests that have become contiguous with the
    /// local executor's history, in order.
    fn drain_pending_remote_commits(&mut self) {
        loop {
            let next_seq = self.executor.len() as u64;
            let Some(request) = self.pending_remote_commits.remove(&next_seq) else {
                break;
            };
            let response = self.sequence_and_classify(&request);
            self.cache_response(request, response);
        }
    }

    /// Handles a response to a previously-sent request: removes it from
    /// the retransmission queue, and — when the local side is client —
    /// sequences the command at the position the server assigned.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the response does not match any
    /// currently outstanding request, or if the peer rejected the request
    /// at the protocol level for a reason other than `wait`.
    pub fn handle_response(&mut self, response: CommandResponseObject) -> Result<(), CoreError> {
        let position = self
            .outbound
            .iter()
            .position(|o| o.request.cid == response.cid)
            .ok_or_else(|| ProtocolError::new("unexpected_response").with_message(format!(
                "no outstanding request with cid '{}'",
                response.cid
            )))?;
        let outbound = self.outbound.remove(position).expect("position came from find");

        let Some(command_seq) = response.command_seq else {
            let code = response.error.as_ref().map(|e| e.code);
            let message = response
                .error
                .map(|e| e.message.unwrap_or_default())
                .unwrap_or_default();
            if code == Some(ErrorCode::Wait) {
                #[cfg(feature = "telemetry")]
                tracing::debug!(peer = %self.other, cid = %outbound.request.cid, "peer asked us to wait, will retransmit");
                self.outbound.push_front(outbound);
                return Ok(());
            }
            #[cfg(feature = "telemetry")]
            tracing::warn!(peer = %self.other, cid = %outbound.request.cid, %message, "request rejected at the protocol level");
            return Err(ProtocolError::new("request_rejected").with_message(message).into());
        };

        let outcome = match response.status {
            ResponseStatus::Success => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(peer = %self.other, cid = %outbound.request.cid, command_seq, "request acknowledged");
                CommandStatus::Success
            }
            ResponseStatus::Failure => {
                let reason = response
                    .error
                    .map(|e| e.message.unwrap_or_default())
                    .unwrap_or_default();
                #[cfg(feature = "telemetry")]
                tracing::warn!(peer = %self.other, cid = %outbound.request.cid, %reason, "request failed");
                CommandStatus::Failure(reason)
            }
        };

        if self.is_server {
            // We already sequenced this ourselves when we proposed it; the
            // peer's command_seq only confirms the position we assigned.
            return Ok(());
        }

        self.commit_own_proposal(outbound.request.command, command_seq, outcome)
    }

    /// Sequences a locally-proposed command at the `command_seq` the
    /// server assigned, now that its response has arrived. Only reachable
    /// on the client side of a channel.
    fn commit_own_proposal(
        &mut self,
        command: CommandKind,
        command_seq: u64,
        outcome: CommandStatus,
    ) -> Result<(), CoreError> {
        match (command_seq as usize).cmp(&self.executor.len()) {
            Ordering::Less => Ok(()),
            Ordering::Greater => {
                let cid = command.cid().to_string();
                self.pending_remote_commits.insert(
                    command_seq,
                    CommandRequestObject {
                        seq: 0,
                        cid,
                        command_seq: Some(command_seq),
                        command,
                    },
                );
                Ok(())
            }
            Ordering::Equal => {
                let seq = self
                    .executor
                    .sequence_next_command(command, true)
                    .expect("allow_sequence_errors=true never errors");
                match outcome {
                    CommandStatus::Success => self.executor.set_success(seq)?,
                    CommandStatus::Failure(reason) => self.executor.set_fail(seq, reason)?,
                    CommandStatus::Pending => {}
                }
                self.drain_pending_remote_commits();
                Ok(())
            }
        }
    }

    /// Would this channel retransmit its oldest outstanding request right
    /// now? True whenever there is an unacknowledged request at all — the
    /// caller (a ticker task) is expected to apply its own backoff timing.
    #[must_use]
    pub fn would_retransmit(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Returns the oldest unacknowledged request to resend, bumping its
    /// attempt counter, or `None` if nothing is outstanding.
    pub fn retransmit_tick(&mut self) -> Option<CommandRequestObject> {
        let outbound = self.outbound.front_mut()?;
        outbound.attempts += 1;
        #[cfg(feature = "telemetry")]
        tracing::debug!(peer = %self.other, cid = %outbound.request.cid, attempts = outbound.attempts, "retransmitting");
        Some(outbound.request.clone())
    }

    fn cache_response(&mut self, request: CommandRequestObject, response: CommandResponseObject) {
        let cid = request.cid.clone();
        if self.response_cache_order.len() >= RESPONSE_CACHE_CAPACITY {
            if let Some(oldest) = self.response_cache_order.pop_front() {
                self.response_cache.remove(&oldest);
                self.other_requests.remove(&oldest);
            }
        }
        self.response_cache_order.push_back(cid.clone());
        self.other_requests.insert(cid.clone(), request);
        self.response_cache.insert(cid, response);
    }

    /// Captures the durable parts of this channel's state: the executor's
    /// command log, the outbound retransmission queue, the request/response
    /// caches used for idempotent replies, the out-of-order command
    /// buffer, and the payment processor's open obligations.
    #[must_use]
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            executor: self.executor.snapshot(),
            next_outbound_seq: self.next_outbound_seq,
            outbound: self.outbound.clone(),
            other_requests: self.other_requests.clone(),
            response_cache: self.response_cache.clone(),
            response_cache_order: self.response_cache_order.clone(),
            pending_remote_commits: self.pending_remote_commits.clone(),
            obligations: self.processor.obligations_snapshot(),
        }
    }

    /// Rebuilds a channel from a snapshot previously returned by
    /// [`Self::snapshot`], re-electing the server role the same way
    /// [`Self::new`] does (a pure function of the two addresses, so it is
    /// always recomputed rather than stored).
    #[must_use]
    pub fn from_snapshot(
        local: Address,
        other: Address,
        business: Arc<dyn BusinessContext>,
        snapshot: ChannelSnapshot,
    ) -> Self {
        let is_server = elect_server(&local, &other);
        #[cfg(feature = "telemetry")]
        tracing::info!(peer = %other, is_server, "channel restored from storage");
        let mut processor = PaymentProcessor::new(business);
        processor.restore_obligations(snapshot.obligations);
        Self {
            local,
            other,
            is_server,
            executor: Executor::from_snapshot(snapshot.executor),
            processor,
            next_outbound_seq: snapshot.next_outbound_seq,
            outbound: snapshot.outbound,
            other_requests: snapshot.other_requests,
            response_cache: snapshot.response_cache,
            response_cache_order: snapshot.response_cache_order,
            pending_remote_commits: snapshot.pending_remote_commits,
        }
    }
}

fn status_to_response(cid: &str, command_seq: u64, status: &CommandStatus) -> CommandResponseObject {
    match status {
        CommandStatus::Success | CommandStatus::Pending => make_success_response(cid.to_string(), command_seq),
        CommandStatus::Failure(reason) => make_command_error(
            cid.to_string(),
            Some(command_seq),
            ErrorCode::PaymentDependencyError,
            None,
            reason.clone(),
        ),
    }
}

/// `x = last_bit(local) xor last_bit(other)`: when `x` is false the
/// greater on-chain address is server, when `x` is true the lesser one is.
fn elect_server(local: &Address, other: &Address) -> bool {
    let parity = local.last_bit() ^ other.last_bit();
    let local_is_greater = local.onchain_greater_or_equal(other);
    if parity {
        !local_is_greater
    } else {
        local_is_greater
    }
}

/// The durable representation of a [`Channel`]'s state, as read and written
/// through [`crate::storage::Storage`] by the VASP root.
///
/// Deliberately flatter than the reference implementation's per-field
/// key hierarchy (`my_requests`, `other_requests`, `command_sequence`, ...
/// each as its own storage key): one snapshot blob per channel is written
/// inside a single [`crate::storage::Storage::atomic_writes`] call, which
/// gives the same all-or-nothing crash-recovery guarantee with one key
/// instead of several that would otherwise need to be kept in lockstep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    executor: ExecutorSnapshot,
    next_outbound_seq: u64,
    outbound: VecDeque<Outbound>,
    other_requests: HashMap<String, CommandRequestObject>,
    response_cache: HashMap<String, CommandResponseObject>,
    response_cache_order: VecDeque<String>,
    pending_remote_commits: BTreeMap<u64, CommandRequestObject>,
    obligations: HashMap<String, crate::command::PaymentCommand>,
}
