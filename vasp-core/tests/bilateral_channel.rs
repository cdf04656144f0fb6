//! Two-`Channel` harness exercising the bilateral protocol without a real
//! transport: both peers' channels live in one test process and requests
//! are handed directly from one `Channel` to the other.

use std::sync::Arc;

use vasp_core::address::{Address, Network};
use vasp_core::channel::Channel;
use vasp_core::command::{CommandKind, PaymentCommand};
use vasp_core::error::BusinessError;
use vasp_core::hooks::{BoxFuture, BusinessContext, VaspInfo};
use vasp_core::payment::{KycData, PaymentAction, PaymentActor, PaymentObject};
use vasp_core::processor::PaymentProcessor;
use vasp_core::status::{Role, Status};
use vasp_core::wire::{CommandRequestObject, ErrorCode, ResponseStatus};

/// A business context that auto-supplies KYC once per actor and always
/// settles, matching `vasp-service`'s sample implementation closely enough
/// to drive the happy-path progression scenario end to end.
struct AlwaysSettleBusiness {
    my_address: String,
}

impl AlwaysSettleBusiness {
    fn new(my_address: impl Into<String>) -> Self {
        Self {
            my_address: my_address.into(),
        }
    }
}

impl BusinessContext for AlwaysSettleBusiness {
    fn vasp_info(&self, _address: &str) -> BoxFuture<'_, Option<VaspInfo>> {
        Box::pin(async { None })
    }

    fn role(&self, payment: &PaymentObject) -> Role {
        if payment.sender.address == self.my_address {
            Role::Sender
        } else {
            Role::Receiver
        }
    }

    fn check_account_existence<'a>(&'a self, _payment: &'a PaymentObject) -> BoxFuture<'a, Result<(), BusinessError>> {
        Box::pin(async { Ok(()) })
    }

    fn next_kyc_to_provide<'a>(
        &'a self,
        payment: &'a PaymentObject,
    ) -> BoxFuture<'a, Result<Option<KycData>, BusinessError>> {
        let already_has = match self.role(payment) {
            Role::Sender => payment.sender.kyc_data.is_some(),
            Role::Receiver => payment.receiver.kyc_data.is_some(),
        };
        Box::pin(async move {
            if already_has {
                Ok(None)
            } else {
                Ok(Some(KycData {
                    blob: r#"{"type":"individual","payment_reference_id":"ref-1"}"#.to_string(),
                }))
            }
        })
    }

    fn validate_recipient_signature<'a>(&'a self, _payment: &'a PaymentObject) -> BoxFuture<'a, Result<(), BusinessError>> {
        Box::pin(async { Ok(()) })
    }

    fn ready_for_settlement<'a>(&'a self, payment: &'a PaymentObject) -> BoxFuture<'a, Result<bool, BusinessError>> {
        let ready = payment.sender.kyc_data.is_some() && payment.receiver.kyc_data.is_some();
        Box::pin(async move { Ok(ready) })
    }

    fn has_settled<'a>(&'a self, _payment: &'a PaymentObject) -> BoxFuture<'a, Result<bool, BusinessError>> {
        Box::pin(async { Ok(true) })
    }
}

fn address(last_byte: u8) -> Address {
    let mut onchain = [0u8; 16];
    onchain[15] = last_byte;
    Address::from_bytes(Network::Testnet, onchain, None)
}

/// Builds a genesis payment command. `sender`/`receiver` are the two
/// channel peers' encoded addresses; `origin` (one of the two) is whichever
/// side is proposing the command.
fn genesis_command(cid: &str, version: &str, sender: &str, receiver: &str, origin: &str) -> CommandKind {
    let payment = PaymentObject::new(
        version,
        format!("ref-{cid}"),
        PaymentActor::new(sender, "sub-0"),
        PaymentActor::new(receiver, "sub-0"),
        PaymentAction {
            amount: 1_000,
            currency: "USD".into(),
            action: "charge".into(),
            timestamp: 0,
        },
    );
    CommandKind::Payment(PaymentCommand::new(cid.to_string(), origin.to_string(), payment))
}

/// `address(1)`'s last on-chain bit is `1`, `address(2)`'s is `0`, so their
/// parity always differs and the lesser on-chain address — `address(1)` —
/// is elected server. Every test below relies on that to know which side of
/// a channel may sequence its own proposals immediately.
fn addr_a() -> Address {
    address(1)
}

fn addr_b() -> Address {
    address(2)
}

/// **S1.** One side submits a command, the other accepts it: both channels
/// end up agreeing on the exact same one-entry sequence.
#[test]
fn s1_benign_round_trip_reaches_agreement() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_a = Arc::new(AlwaysSettleBusiness::new(encoded_a.clone()));
    let business_b = Arc::new(AlwaysSettleBusiness::new(encoded_b.clone()));

    let mut channel_a = Channel::new(addr_a(), addr_b(), business_a);
    let mut channel_b = Channel::new(addr_b(), addr_a(), business_b);
    assert!(channel_a.is_server());
    assert!(!channel_b.is_server());

    let command = genesis_command("hello", "v0", &encoded_a, &encoded_b, &encoded_a);
    let request = channel_a.sequence_command_local(command).unwrap();
    assert_eq!(request.command_seq, Some(0), "the server assigns its own proposal's position immediately");

    let response = channel_b.handle_request(request.clone());
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.command_seq, Some(0));

    channel_a.handle_response(response).unwrap();

    assert_eq!(channel_a.executor().len(), 1);
    assert_eq!(channel_b.executor().len(), 1);
    assert_eq!(channel_a.executor().get(0), channel_b.executor().get(0));
    assert_eq!(channel_a.executor().status(0), channel_b.executor().status(0));
}

/// **Invariant 6 (idempotent retransmission).** Replaying the exact same
/// request twice must not re-validate or re-sequence it: the second
/// delivery is answered straight from the response cache.
#[test]
fn retransmitted_request_is_answered_from_cache_not_resequenced() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_b = Arc::new(AlwaysSettleBusiness::new(encoded_b.clone()));
    let mut channel_b = Channel::new(addr_b(), addr_a(), business_b);

    let command = genesis_command("hello", "v0", &encoded_a, &encoded_b, &encoded_a);
    let request = CommandRequestObject {
        seq: 0,
        cid: "hello".to_string(),
        command_seq: Some(0),
        command,
    };

    let first = channel_b.handle_request(request.clone());
    let second = channel_b.handle_request(request);

    assert_eq!(first.status, second.status);
    assert_eq!(channel_b.executor().len(), 1, "a retransmit must not sequence a second command");
}

/// A `cid` reused with a different command payload must be rejected as a
/// protocol-level conflict, not answered from cache and not sequenced.
#[test]
fn reused_cid_with_a_different_payload_is_a_conflict() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_b = Arc::new(AlwaysSettleBusiness::new(encoded_b.clone()));
    let mut channel_b = Channel::new(addr_b(), addr_a(), business_b);

    let first_request = CommandRequestObject {
        seq: 0,
        cid: "hello".to_string(),
        command_seq: Some(0),
        command: genesis_command("hello", "v0", &encoded_a, &encoded_b, &encoded_a),
    };
    assert_eq!(channel_b.handle_request(first_request).status, ResponseStatus::Success);

    let conflicting_request = CommandRequestObject {
        seq: 0,
        cid: "hello".to_string(),
        command_seq: Some(1),
        command: genesis_command("hello", "v0-conflict", &encoded_a, &encoded_b, &encoded_a),
    };
    let response = channel_b.handle_request(conflicting_request);

    assert_eq!(response.status, ResponseStatus::Failure);
    assert_eq!(response.error.unwrap().code, ErrorCode::Conflict);
    assert_eq!(channel_b.executor().len(), 1, "the conflicting cid must not be sequenced");
}

/// A client setting `command_seq` itself, or a server's peer omitting it,
/// is malformed and rejected before ever reaching sequencing.
#[test]
fn command_seq_set_by_the_wrong_side_is_malformed() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();

    // channel_a is server: a request that already carries command_seq
    // looks like a client trying to assign its own position.
    let business_a = Arc::new(AlwaysSettleBusiness::new(encoded_a.clone()));
    let mut channel_a = Channel::new(addr_a(), addr_b(), business_a);
    let request_with_seq = CommandRequestObject {
        seq: 0,
        cid: "hello".to_string(),
        command_seq: Some(0),
        command: genesis_command("hello", "v0", &encoded_a, &encoded_b, &encoded_b),
    };
    let response = channel_a.handle_request(request_with_seq);
    assert_eq!(response.status, ResponseStatus::Failure);
    assert_eq!(response.error.unwrap().code, ErrorCode::Malformed);
    assert!(channel_a.executor().is_empty());

    // channel_b is client: a request missing command_seq looks like the
    // server never assigned one.
    let business_b = Arc::new(AlwaysSettleBusiness::new(encoded_b.clone()));
    let mut channel_b = Channel::new(addr_b(), addr_a(), business_b);
    let request_without_seq = CommandRequestObject {
        seq: 0,
        cid: "hello".to_string(),
        command_seq: None,
        command: genesis_command("hello", "v0", &encoded_a, &encoded_b, &encoded_a),
    };
    let response = channel_b.handle_request(request_without_seq);
    assert_eq!(response.status, ResponseStatus::Failure);
    assert_eq!(response.error.unwrap().code, ErrorCode::Malformed);
    assert!(channel_b.executor().is_empty());
}

/// A side with a locally-originated request still awaiting a response
/// answers a freshly arriving inbound proposal with `wait` rather than
/// interleaving the two.
#[test]
fn inbound_request_is_told_to_wait_behind_an_unacked_local_proposal() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_a = Arc::new(AlwaysSettleBusiness::new(encoded_a.clone()));
    let mut channel_a = Channel::new(addr_a(), addr_b(), business_a);

    // channel_a (server) proposes, but nothing has acked it yet.
    channel_a
        .sequence_command_local(genesis_command("from-a", "v0", &encoded_a, &encoded_b, &encoded_a))
        .unwrap();

    // Meanwhile an inbound proposal from the peer arrives; channel_a must
    // ask it to wait rather than sequence it out from under its own
    // outstanding proposal.
    let inbound = CommandRequestObject {
        seq: 0,
        cid: "from-b".to_string(),
        command_seq: None,
        command: genesis_command("from-b", "vb0", &encoded_a, &encoded_b, &encoded_b),
    };
    let response = channel_a.handle_request(inbound);

    assert_eq!(response.status, ResponseStatus::Failure);
    assert_eq!(response.error.unwrap().code, ErrorCode::Wait);
    assert_eq!(channel_a.executor().len(), 1, "only the earlier local proposal is sequenced");
}

/// **S3-style interleaving.** Each side proposes in turn, and both ends up
/// agreeing on the full two-command history — the client's own proposal is
/// only reflected once the server's response carries its assigned position.
#[test]
fn both_sides_can_propose_in_either_direction() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_a = Arc::new(AlwaysSettleBusiness::new(encoded_a.clone()));
    let business_b = Arc::new(AlwaysSettleBusiness::new(encoded_b.clone()));

    let mut channel_a = Channel::new(addr_a(), addr_b(), business_a);
    let mut channel_b = Channel::new(addr_b(), addr_a(), business_b);

    // channel_a, the server, proposes and settles first.
    let request_from_a = channel_a
        .sequence_command_local(genesis_command("from-a", "va0", &encoded_a, &encoded_b, &encoded_a))
        .unwrap();
    let response_for_a = channel_b.handle_request(request_from_a);
    assert_eq!(response_for_a.status, ResponseStatus::Success);
    channel_a.handle_response(response_for_a).unwrap();

    // Now channel_b, the client, proposes a second, independent payment;
    // channel_a's outbound queue is empty again so it is free to sequence
    // channel_b's proposal.
    let request_from_b = channel_b
        .sequence_command_local(genesis_command("from-b", "vb0", &encoded_a, &encoded_b, &encoded_b))
        .unwrap();
    assert_eq!(request_from_b.command_seq, None, "the client never assigns its own position");

    let response_for_b = channel_a.handle_request(request_from_b);
    assert_eq!(response_for_b.status, ResponseStatus::Success);
    assert_eq!(response_for_b.command_seq, Some(1));
    channel_b.handle_response(response_for_b).unwrap();

    assert_eq!(channel_a.executor().len(), 2);
    assert_eq!(channel_b.executor().len(), 2);
    assert_eq!(channel_a.executor().get(1), channel_b.executor().get(1));
}

/// **S4-style dependency collapse, local proposal.** Two commands the same
/// side proposes from the same live version race; once the executor
/// commits the first, the second is rejected outright — there is no peer
/// to agree on recording a locally-originated rejection.
#[test]
fn a_second_local_proposal_from_an_already_consumed_version_is_rejected_outright() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_a = Arc::new(AlwaysSettleBusiness::new(encoded_a.clone()));
    let mut channel_a = Channel::new(addr_a(), addr_b(), business_a);

    let base = channel_a
        .sequence_command_local(genesis_command("a", "v0", &encoded_a, &encoded_b, &encoded_a))
        .unwrap();
    channel_a
        .handle_response(vasp_core::wire::make_success_response(base.cid, 0))
        .unwrap();

    let mut first_update = PaymentObject::new(
        "v1",
        "ref-a",
        PaymentActor::new(&encoded_a, "sub-0"),
        PaymentActor::new(&encoded_b, "sub-0"),
        PaymentAction {
            amount: 1_000,
            currency: "USD".into(),
            action: "charge".into(),
            timestamp: 0,
        },
    );
    first_update.shared.previous_versions = vec!["v0".to_string()];
    let command_b = CommandKind::Payment(PaymentCommand::new("b".to_string(), encoded_a.clone(), first_update.clone()));
    channel_a.sequence_command_local(command_b).unwrap();
    channel_a
        .handle_response(vasp_core::wire::make_success_response("b".to_string(), 1))
        .unwrap();

    let mut second_update = first_update;
    second_update.shared.version = "v1-conflict".to_string();
    let command_c = CommandKind::Payment(PaymentCommand::new("c".to_string(), encoded_a, second_update));
    let result = channel_a.sequence_command_local(command_c);

    assert!(result.is_err(), "a second command depending on an already-consumed version must be rejected");
    assert_eq!(channel_a.executor().len(), 2, "only the genesis and the winning update are sequenced");
}

/// **S4.** A command the counterparty proposes against a version this side
/// has already consumed is not silently dropped: it is still sequenced, at
/// a definite position both sides can agree on, and recorded as a failure.
#[test]
fn peer_proposed_conflicting_update_is_still_recorded_as_a_failure() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_b = Arc::new(AlwaysSettleBusiness::new(encoded_b.clone()));
    let mut channel_b = Channel::new(addr_b(), addr_a(), business_b);
    assert!(!channel_b.is_server());

    let genesis_request = CommandRequestObject {
        seq: 0,
        cid: "genesis".to_string(),
        command_seq: Some(0),
        command: genesis_command("genesis", "v0", &encoded_a, &encoded_b, &encoded_a),
    };
    assert_eq!(channel_b.handle_request(genesis_request).status, ResponseStatus::Success);

    let mut winner = PaymentObject::new(
        "v1",
        "ref-genesis",
        PaymentActor::new(&encoded_a, "sub-0"),
        PaymentActor::new(&encoded_b, "sub-0"),
        PaymentAction {
            amount: 1_000,
            currency: "USD".into(),
            action: "charge".into(),
            timestamp: 0,
        },
    );
    winner.shared.previous_versions = vec!["v0".to_string()];
    let winner_request = CommandRequestObject {
        seq: 0,
        cid: "winner".to_string(),
        command_seq: Some(1),
        command: CommandKind::Payment(PaymentCommand::new("winner".to_string(), encoded_a.clone(), winner.clone())),
    };
    assert_eq!(channel_b.handle_request(winner_request).status, ResponseStatus::Success);

    // The server has already told channel_b this lost the race and was
    // assigned position 2 as a failure — channel_b must record it there
    // too, not silently drop it.
    let mut loser = winner;
    loser.shared.version = "v1-conflict".to_string();
    let loser_request = CommandRequestObject {
        seq: 0,
        cid: "loser".to_string(),
        command_seq: Some(2),
        command: CommandKind::Payment(PaymentCommand::new("loser".to_string(), encoded_a, loser)),
    };
    let response = channel_b.handle_request(loser_request);

    assert_eq!(response.status, ResponseStatus::Failure);
    assert_eq!(response.command_seq, Some(2), "a recorded failure still carries its agreed position");
    assert_eq!(
        channel_b.executor().len(),
        3,
        "the losing command is recorded as a failure, not omitted from the sequence"
    );
    assert!(matches!(
        channel_b.executor().status(2),
        Some(vasp_core::executor::CommandStatus::Failure(_))
    ));
}

/// **S5.** A fresh payment, driven independently by each side's own
/// business context, progresses all the way to both sides `settled`.
#[tokio::test]
async fn s5_payment_happy_path_reaches_settled_on_both_sides() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_a = Arc::new(AlwaysSettleBusiness::new(encoded_a.clone()));
    let business_b = Arc::new(AlwaysSettleBusiness::new(encoded_b.clone()));
    let mut processor_a = PaymentProcessor::new(business_a);
    let mut processor_b = PaymentProcessor::new(business_b);

    let mut payment = PaymentObject::new(
        "v0",
        "ref-1",
        PaymentActor::new(&encoded_a, "sub-0"),
        PaymentActor::new(&encoded_b, "sub-0"),
        PaymentAction {
            amount: 500,
            currency: "USD".into(),
            action: "charge".into(),
            timestamp: 0,
        },
    );

    for _ in 0..8 {
        let command_a = PaymentCommand::new("step-a".to_string(), encoded_a.clone(), payment.clone());
        let from_a = processor_a.process_command_async(command_a).await.unwrap();
        if let Some(followup) = &from_a {
            payment = followup.payment.clone();
        }

        let command_b = PaymentCommand::new("step-b".to_string(), encoded_b.clone(), payment.clone());
        let from_b = processor_b.process_command_async(command_b).await.unwrap();
        if let Some(followup) = &from_b {
            payment = followup.payment.clone();
        }

        if from_a.is_none() && from_b.is_none() {
            break;
        }
    }

    assert_eq!(payment.sender.status, Status::Settled);
    assert_eq!(payment.receiver.status, Status::Settled);
}

/// **S6 (finality barrier).** Once the sender has reached
/// `ready_for_settlement`, a peer-proposed update that flips it straight to
/// `abort` while the receiver has not aborted is rejected as a command
/// error rather than committed.
#[test]
fn s6_finality_barrier_rejects_unilateral_abort_after_ready() {
    let encoded_a = addr_a().encode();
    let encoded_b = addr_b().encode();
    let business_b = Arc::new(AlwaysSettleBusiness::new(encoded_b.clone()));
    let mut channel_b = Channel::new(addr_b(), addr_a(), business_b);
    assert!(!channel_b.is_server(), "channel_b must be client for these hand-built command_seqs to be valid");

    let genesis = PaymentObject::new(
        "v0",
        "ref-1",
        PaymentActor::new(&encoded_a, "sub-0"),
        PaymentActor::new(&encoded_b, "sub-0"),
        PaymentAction {
            amount: 500,
            currency: "USD".into(),
            action: "charge".into(),
            timestamp: 0,
        },
    );
    let genesis_request = CommandRequestObject {
        seq: 0,
        cid: "genesis".to_string(),
        command_seq: Some(0),
        command: CommandKind::Payment(PaymentCommand::new("genesis".to_string(), encoded_a.clone(), genesis.clone())),
    };
    assert_eq!(channel_b.handle_request(genesis_request).status, ResponseStatus::Success);

    // The sender reaches ready_for_settlement on its own; this only
    // touches the sender's own actor, so it is a valid single-origin diff.
    let mut sender_ready = genesis;
    sender_ready.shared = sender_ready.shared.new_version();
    sender_ready.sender.status = Status::ReadyForSettlement;
    let sender_ready_request = CommandRequestObject {
        seq: 0,
        cid: "sender-ready".to_string(),
        command_seq: Some(1),
        command: CommandKind::Payment(PaymentCommand::new(
            "sender-ready".to_string(),
            encoded_a.clone(),
            sender_ready.clone(),
        )),
    };
    assert_eq!(channel_b.handle_request(sender_ready_request).status, ResponseStatus::Success);

    // And so does the receiver, independently.
    let mut both_ready = sender_ready;
    both_ready.shared = both_ready.shared.new_version();
    both_ready.receiver.status = Status::ReadyForSettlement;
    let receiver_ready_request = CommandRequestObject {
        seq: 0,
        cid: "receiver-ready".to_string(),
        command_seq: Some(2),
        command: CommandKind::Payment(PaymentCommand::new(
            "receiver-ready".to_string(),
            encoded_b.clone(),
            both_ready.clone(),
        )),
    };
    assert_eq!(channel_b.handle_request(receiver_ready_request).status, ResponseStatus::Success);

    // The sender now tries to unilaterally abort while the receiver is
    // still only `ready_for_settlement`: the finality barrier must reject it.
    let mut aborted = both_ready;
    aborted.shared = aborted.shared.new_version();
    aborted.sender.status = Status::Abort;
    let abort_request = CommandRequestObject {
        seq: 0,
        cid: "abort-attempt".to_string(),
        command_seq: Some(3),
        command: CommandKind::Payment(PaymentCommand::new("abort-attempt".to_string(), encoded_a, aborted)),
    };
    let response = channel_b.handle_request(abort_request);

    assert_eq!(response.status, ResponseStatus::Failure);
    assert_eq!(
        channel_b.executor().len(),
        4,
        "the rejected abort is still recorded at an agreed position, just marked a failure"
    );
}
