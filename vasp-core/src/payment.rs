//! The payment object and its constituent actors.

use serde::{Deserialize, Serialize};

use crate::error::StructureError;
use crate::record::{Diff, FieldDescriptor, Mutability, Presence, StructuredRecord};
use crate::shared_object::SharedObject;
use crate::status::Status;

/// Opaque KYC evidence exchanged between two actors.
///
/// The blob is treated as an opaque string by the protocol; business logic
/// may interpret it as JSON (and is expected to include a
/// `payment_reference_id` and a `type` of `individual` or `entity`), but
/// the core protocol does not otherwise inspect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycData {
    /// The opaque KYC payload.
    pub blob: String,
}

/// One side (sender or receiver) of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentActor {
    /// The actor's VASP address, encoded as a string (see [`crate::address::Address`]).
    pub address: String,
    /// The actor's subaddress, encoded as a string.
    pub subaddress: String,
    /// KYC evidence provided by this actor, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc_data: Option<KycData>,
    /// This actor's current status.
    pub status: Status,
    /// Free-form metadata strings appended over the life of the payment.
    #[serde(default)]
    pub metadata: Vec<String>,
}

impl PaymentActor {
    /// Creates a new actor at [`Status::None`] with no KYC data or metadata.
    #[must_use]
    pub fn new(address: impl Into<String>, subaddress: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            subaddress: subaddress.into(),
            kyc_data: None,
            status: Status::None,
            metadata: Vec::new(),
        }
    }
}

impl StructuredRecord for PaymentActor {
    fn field_descriptors() -> &'static [FieldDescriptor] {
        &[
            FieldDescriptor {
                name: "address",
                presence: Presence::Required,
                mutability: Mutability::WriteOnce,
            },
            FieldDescriptor {
                name: "subaddress",
                presence: Presence::Required,
                mutability: Mutability::WriteOnce,
            },
            FieldDescriptor {
                name: "kyc_data",
                presence: Presence::Optional,
                mutability: Mutability::WriteOnce,
            },
            FieldDescriptor {
                name: "status",
                presence: Presence::Required,
                mutability: Mutability::Updatable,
            },
            FieldDescriptor {
                name: "metadata",
                presence: Presence::Required,
                mutability: Mutability::Updatable,
            },
        ]
    }
}

/// The transfer being requested: amount, currency, a business action label,
/// and when it was proposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentAction {
    /// Amount in minor currency units (e.g. cents). Must be greater than zero.
    pub amount: u64,
    /// ISO 4217-style currency code.
    pub currency: String,
    /// A business-defined action label (e.g. `"charge"`).
    pub action: String,
    /// Unix timestamp, in seconds, when the action was proposed.
    pub timestamp: u64,
}

/// The full payment object exchanged between two VASPs.
///
/// A `PaymentObject` is itself a versioned [`SharedObject`]: every update
/// to it produces a new version whose `previous_versions` names the
/// version it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentObject {
    /// Version bookkeeping.
    #[serde(flatten)]
    pub shared: SharedObject,
    /// A reference identifier stable across every version of this payment.
    pub reference_id: String,
    /// The original command version that created this payment, if this
    /// payment was derived from another (e.g. a refund).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_payment_reference_id: Option<String>,
    /// The paying actor.
    pub sender: PaymentActor,
    /// The receiving actor.
    pub receiver: PaymentActor,
    /// The requested transfer.
    pub action: PaymentAction,
    /// Free-form payment-level description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PaymentObject {
    /// Creates a fresh payment object at its initial version.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        reference_id: impl Into<String>,
        sender: PaymentActor,
        receiver: PaymentActor,
        action: PaymentAction,
    ) -> Self {
        Self {
            shared: SharedObject::new(version),
            reference_id: reference_id.into(),
            original_payment_reference_id: None,
            sender,
            receiver,
            action,
            description: None,
        }
    }
}

impl StructuredRecord for PaymentObject {
    fn field_descriptors() -> &'static [FieldDescriptor] {
        &[
            FieldDescriptor {
                name: "reference_id",
                presence: Presence::Required,
                mutability: Mutability::WriteOnce,
            },
            FieldDescriptor {
                name: "original_payment_reference_id",
                presence: Presence::Optional,
                mutability: Mutability::WriteOnce,
            },
            FieldDescriptor {
                name: "sender",
                presence: Presence::Required,
                mutability: Mutability::Updatable,
            },
            FieldDescriptor {
                name: "receiver",
                presence: Presence::Required,
                mutability: Mutability::Updatable,
            },
            FieldDescriptor {
                name: "action",
                presence: Presence::Required,
                mutability: Mutability::WriteOnce,
            },
            FieldDescriptor {
                name: "description",
                presence: Presence::Optional,
                mutability: Mutability::Updatable,
            },
        ]
    }

    fn custom_checks(&self, _diff: &Diff) -> Result<(), StructureError> {
        if self.action.amount == 0 {
            return Err(StructureError::new("payment action amount must be greater than zero")
                .with_field("action.amount"));
        }
        if let Some(kyc) = &self.sender.kyc_data {
            validate_kyc_blob(&kyc.blob)?;
        }
        if let Some(kyc) = &self.receiver.kyc_data {
            validate_kyc_blob(&kyc.blob)?;
        }
        Ok(())
    }
}

fn validate_kyc_blob(blob: &str) -> Result<(), StructureError> {
    let value: serde_json::Value = serde_json::from_str(blob)
        .map_err(|err| StructureError::new(format!("kyc blob is not valid JSON: {err}")))?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| StructureError::new("kyc blob missing 'type'"))?;
    if kind != "individual" && kind != "entity" {
        return Err(StructureError::new("kyc blob 'type' must be 'individual' or 'entity'"));
    }
    if value.get("payment_reference_id").is_none() {
        return Err(StructureError::new("kyc blob missing 'payment_reference_id'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PaymentObject {
        PaymentObject::new(
            "v0",
            "ref-1",
            PaymentActor::new("addr-a", "sub-a"),
            PaymentActor::new("addr-b", "sub-b"),
            PaymentAction {
                amount: 100,
                currency: "USD".into(),
                action: "charge".into(),
                timestamp: 0,
            },
        )
    }

    #[test]
    fn rejects_zero_amount() {
        let mut payment = sample();
        payment.action.amount = 0;
        assert!(payment.custom_checks(&Diff::new()).is_err());
    }

    #[test]
    fn rejects_malformed_kyc_blob() {
        let mut payment = sample();
        payment.sender.kyc_data = Some(KycData {
            blob: "not json".into(),
        });
        assert!(payment.custom_checks(&Diff::new()).is_err());
    }

    #[test]
    fn accepts_well_formed_kyc_blob() {
        let mut payment = sample();
        payment.sender.kyc_data = Some(KycData {
            blob: r#"{"type":"individual","payment_reference_id":"ref-1"}"#.into(),
        });
        assert!(payment.custom_checks(&Diff::new()).is_ok());
    }

    #[test]
    fn actor_rejects_rewriting_its_address() {
        let actor = PaymentActor::new("addr-a", "sub-a");
        let mut other = actor.clone();
        other.address = "addr-other".into();
        let diff = actor.diff_from(&other);
        assert!(actor.update(&diff).is_err());
    }

    #[test]
    fn actor_allows_updating_status() {
        let actor = PaymentActor::new("addr-a", "sub-a");
        let mut other = actor.clone();
        other.status = Status::NeedsKycData;
        let diff = actor.diff_from(&other);
        let updated = actor.update(&diff).unwrap();
        assert_eq!(updated.status, Status::NeedsKycData);
        assert_eq!(updated.address, actor.address);
    }
}
