//! Structured records: typed objects whose fields carry explicit
//! presence (`Required`/`Optional`) and mutability (`WriteOnce`/`Updatable`)
//! rules, diffed and applied as JSON patches over the wire.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StructureError;

/// Whether a field must be present in every valid instance of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The field must always carry a non-null value.
    Required,
    /// The field may be absent or null.
    Optional,
}

/// Whether a field, once set to a non-null value, may be changed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// The field may be set exactly once; subsequent diffs must repeat the
    /// same value or omit the field.
    WriteOnce,
    /// The field may be freely overwritten by either party.
    Updatable,
}

/// Describes one field of a [`StructuredRecord`].
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    /// The field's key in the JSON representation.
    pub name: &'static str,
    /// Required or optional.
    pub presence: Presence,
    /// Write-once or updatable.
    pub mutability: Mutability,
}

/// A partial update to a [`StructuredRecord`]: field name to new value.
pub type Diff = BTreeMap<String, Value>;

/// A record whose field-level write semantics are enforced independently
/// of its Rust type definition, mirroring the reference implementation's
/// per-field `WRITE_ONCE`/`UPDATABLE` flags.
pub trait StructuredRecord: Serialize + DeserializeOwned + Clone {
    /// The record's field table, used to validate diffs generically.
    fn field_descriptors() -> &'static [FieldDescriptor];

    /// Extra validation beyond presence/mutability, e.g. "amount must be
    /// positive" or "kyc blob must parse". Called after a diff has been
    /// structurally applied. Default: no extra checks.
    ///
    /// # Errors
    ///
    /// Returns a [`StructureError`] if the resulting record violates a
    /// type-specific invariant.
    fn custom_checks(&self, _diff: &Diff) -> Result<(), StructureError> {
        Ok(())
    }

    /// Serializes this record to its full JSON representation.
    ///
    /// # Panics
    ///
    /// Panics if the type's `Serialize` implementation fails, which does
    /// not happen for well-formed records composed of standard types.
    #[must_use]
    fn get_full_record(&self) -> Value {
        serde_json::to_value(self).expect("StructuredRecord types always serialize")
    }

    /// Reconstructs a record from its full JSON representation.
    ///
    /// # Errors
    ///
    /// Returns a [`StructureError`] if the JSON value doesn't match the
    /// record's shape.
    fn from_full_record(record: Value) -> Result<Self, StructureError> {
        serde_json::from_value(record)
            .map_err(|err| StructureError::new(format!("malformed record: {err}")))
    }

    /// Applies `diff` to this record, enforcing field presence and
    /// mutability rules, then running [`custom_checks`](Self::custom_checks)
    /// on the result.
    ///
    /// # Errors
    ///
    /// Returns a [`StructureError`] if `diff` names an unknown field,
    /// attempts to change a write-once field to a new value, drops a
    /// required field, or fails a custom check.
    fn update(&self, diff: &Diff) -> Result<Self, StructureError> {
        let mut current = self.get_full_record();
        let obj = current
            .as_object_mut()
            .ok_or_else(|| StructureError::new("record did not serialize to a JSON object"))?;

        for (name, new_value) in diff {
            let descriptor = Self::field_descriptors()
                .iter()
                .find(|d| d.name == name)
                .ok_or_else(|| {
                    StructureError::new("unknown field in diff").with_field(name.clone())
                })?;

            if descriptor.mutability == Mutability::WriteOnce {
                if let Some(existing) = obj.get(name.as_str()) {
                    if !existing.is_null() && existing != new_value {
                        return Err(StructureError::new("field is write-once and already set")
                            .with_field(name.clone()));
                    }
                }
            }

            obj.insert(name.clone(), new_value.clone());
        }

        for descriptor in Self::field_descriptors() {
            if descriptor.presence == Presence::Required {
                let present = obj
                    .get(descriptor.name)
                    .is_some_and(|v| !v.is_null());
                if !present {
                    return Err(StructureError::new("required field is missing")
                        .with_field(descriptor.name));
                }
            }
        }

        let updated = Self::from_full_record(current)?;
        updated.custom_checks(diff)?;
        Ok(updated)
    }

    /// Computes the minimal diff needed to turn `self` into `other`,
    /// restricted to fields whose JSON representation actually changed.
    fn diff_from(&self, other: &Self) -> Diff {
        let before = self.get_full_record();
        let after = other.get_full_record();
        let mut out = Diff::new();
        if let (Some(before), Some(after)) = (before.as_object(), after.as_object()) {
            for (key, after_value) in after {
                if before.get(key) != Some(after_value) {
                    out.insert(key.clone(), after_value.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        id: String,
        label: Option<String>,
    }

    impl StructuredRecord for Widget {
        fn field_descriptors() -> &'static [FieldDescriptor] {
            &[
                FieldDescriptor {
                    name: "id",
                    presence: Presence::Required,
                    mutability: Mutability::WriteOnce,
                },
                FieldDescriptor {
                    name: "label",
                    presence: Presence::Optional,
                    mutability: Mutability::Updatable,
                },
            ]
        }
    }

    #[test]
    fn rejects_rewriting_write_once_field() {
        let w = Widget {
            id: "a".into(),
            label: None,
        };
        let mut diff = Diff::new();
        diff.insert("id".into(), Value::String("b".into()));
        assert!(w.update(&diff).is_err());
    }

    #[test]
    fn allows_updating_updatable_field() {
        let w = Widget {
            id: "a".into(),
            label: None,
        };
        let mut diff = Diff::new();
        diff.insert("label".into(), Value::String("hi".into()));
        let updated = w.update(&diff).unwrap();
        assert_eq!(updated.label.as_deref(), Some("hi"));
    }

    #[test]
    fn rejects_unknown_field() {
        let w = Widget {
            id: "a".into(),
            label: None,
        };
        let mut diff = Diff::new();
        diff.insert("bogus".into(), Value::Bool(true));
        assert!(w.update(&diff).is_err());
    }
}
