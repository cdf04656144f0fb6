//! The VASP root: owns one [`Channel`] per counterparty address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::address::Address;
use crate::channel::{Channel, ChannelSnapshot};
use crate::error::CoreError;
use crate::hooks::BusinessContext;
use crate::storage::Storage;
use crate::wire::{CommandRequestObject, CommandResponseObject};

/// Storage key holding the encoded addresses of every counterparty this
/// node has ever opened a channel with.
const ROSTER_KEY: &str = "channel_roster";

/// A VASP node, identified by its own address, with one channel opened
/// lazily per counterparty it has transacted with.
pub struct OffChainVasp {
    local: Address,
    business: Arc<dyn BusinessContext>,
    channels: Mutex<HashMap<String, Arc<Mutex<Channel>>>>,
    storage: Option<Arc<Storage>>,
}

impl OffChainVasp {
    /// Creates a VASP root at `local`, using `business` for every channel
    /// it opens. Channel state lives only in memory; use
    /// [`Self::with_storage`] for a node that must survive a restart.
    #[must_use]
    pub fn new(local: Address, business: Arc<dyn BusinessContext>) -> Self {
        Self {
            local,
            business,
            channels: Mutex::new(HashMap::new()),
            storage: None,
        }
    }

    /// Creates a VASP root backed by `storage`, restoring every channel
    /// found in the channel roster left behind by a previous run.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the roster or a channel snapshot exists
    /// but fails to deserialize.
    pub fn with_storage(
        local: Address,
        business: Arc<dyn BusinessContext>,
        storage: Arc<Storage>,
    ) -> Result<Self, CoreError> {
        let roster: Vec<String> = storage.get(ROSTER_KEY)?.unwrap_or_default();
        let mut channels = HashMap::new();
        for encoded in roster {
            let Some(snapshot): Option<ChannelSnapshot> = storage.get(&channel_key(&encoded))? else {
                continue;
            };
            let other = Address::decode(&encoded)?;
            let channel = Channel::from_snapshot(local.clone(), other, Arc::clone(&business), snapshot);
            channels.insert(encoded, Arc::new(Mutex::new(channel)));
        }
        Ok(Self {
            local,
            business,
            channels: Mutex::new(channels),
            storage: Some(storage),
        })
    }

    /// This VASP's own address.
    #[must_use]
    pub const fn local_address(&self) -> &Address {
        &self.local
    }

    /// Returns the channel to `other`, opening one if this is the first
    /// time the two VASPs have transacted.
    #[must_use]
    pub fn channel_to(&self, other: &Address) -> Arc<Mutex<Channel>> {
        let key = other.encode();
        let mut channels = self.channels.lock().expect("channel registry mutex poisoned");
        let is_new = !channels.contains_key(&key);
        let channel = channels
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Channel::new(
                    self.local.clone(),
                    other.clone(),
                    Arc::clone(&self.business),
                )))
            })
            .clone();
        drop(channels);
        if is_new {
            if let Some(storage) = &self.storage {
                let _ = add_to_roster(storage, &key);
                let snapshot = channel.lock().expect("channel mutex poisoned").snapshot();
                let _ = storage.set(&channel_key(&key), &snapshot);
            }
        }
        channel
    }

    /// Persists the current state of the channel to `other`, if this node
    /// was constructed with [`Self::with_storage`]. Called by every
    /// channel-mutating wrapper below; exposed directly for callers (e.g.
    /// a retransmission ticker) that mutate a channel through its handle
    /// rather than through one of those wrappers.
    pub fn persist_channel(&self, other_encoded: &str) -> Result<(), CoreError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let Some(channel) = self.existing_channel(other_encoded) else {
            return Ok(());
        };
        let snapshot = channel.lock().expect("channel mutex poisoned").snapshot();
        storage.atomic_writes(|tx| tx.set(&channel_key(other_encoded), &snapshot))?;
        Ok(())
    }

    /// Proposes a new command on the channel to `other`, persisting the
    /// resulting channel state if this node is storage-backed.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the command fails validation, or if
    /// persisting the updated channel state fails.
    pub fn sequence_command_local(
        &self,
        other: &Address,
        command: crate::command::CommandKind,
    ) -> Result<CommandRequestObject, CoreError> {
        let channel = self.channel_to(other);
        let request = channel
            .lock()
            .expect("channel mutex poisoned")
            .sequence_command_local(command)?;
        self.persist_channel(&other.encode())?;
        Ok(request)
    }

    /// Handles an incoming request on the channel to `other`, persisting
    /// the resulting channel state if this node is storage-backed.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if persisting the updated channel state
    /// fails; a rejected command is still reported as an ordinary
    /// [`CommandResponseObject`] failure, not a `Result::Err`.
    pub fn handle_request(
        &self,
        other: &Address,
        request: CommandRequestObject,
    ) -> Result<CommandResponseObject, CoreError> {
        let channel = self.channel_to(other);
        let response = channel.lock().expect("channel mutex poisoned").handle_request(request);
        self.persist_channel(&other.encode())?;
        Ok(response)
    }

    /// Handles a response to a previously-sent request on the channel to
    /// `other`, persisting the resulting channel state if this node is
    /// storage-backed.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the response does not match any
    /// outstanding request, or if persisting the updated state fails.
    pub fn handle_response(
        &self,
        other: &Address,
        response: CommandResponseObject,
    ) -> Result<(), CoreError> {
        let channel = self.channel_to(other);
        channel.lock().expect("channel mutex poisoned").handle_response(response)?;
        self.persist_channel(&other.encode())
    }

    /// Returns the channel keyed by `other`'s encoded address, if one has
    /// already been opened, without creating it.
    #[must_use]
    pub fn existing_channel(&self, other_encoded: &str) -> Option<Arc<Mutex<Channel>>> {
        self.channels
            .lock()
            .expect("channel registry mutex poisoned")
            .get(other_encoded)
            .cloned()
    }

    /// The number of counterparties this VASP currently has an open
    /// channel with.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().expect("channel registry mutex poisoned").len()
    }

    /// The encoded addresses of every counterparty this VASP currently has
    /// an open channel with, e.g. for a background task that needs to poll
    /// each channel in turn.
    #[must_use]
    pub fn counterparty_addresses(&self) -> Vec<String> {
        self.channels
            .lock()
            .expect("channel registry mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Re-runs asynchronous progression for every open obligation across
    /// every restored channel, returning the counterparty each resulting
    /// follow-up command should be sequenced and sent to. Intended to be
    /// called once at startup, after [`Self::with_storage`], to resume
    /// progression that was interrupted by a crash between committing a
    /// command and proposing its follow-up.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if a channel's business collaborator
    /// rejects an obligation it is retrying, or if persisting the
    /// updated channel state fails. Channels processed before the
    /// failing one keep their progress.
    pub async fn retry_open_obligations(&self) -> Result<Vec<(Address, crate::command::CommandKind)>, CoreError> {
        let channels: Vec<(String, Arc<Mutex<Channel>>)> = self
            .channels
            .lock()
            .expect("channel registry mutex poisoned")
            .iter()
            .map(|(key, channel)| (key.clone(), Arc::clone(channel)))
            .collect();

        let mut followups = Vec::new();
        for (key, channel) in channels {
            let retried = {
                let mut guard = channel.lock().expect("channel mutex poisoned");
                guard
                    .processor_mut()
                    .retry_open_obligations()
                    .await
                    .map_err(CoreError::from)?
            };
            if !retried.is_empty() {
                let other = channel.lock().expect("channel mutex poisoned").peer().clone();
                followups.extend(retried.into_iter().map(|cmd| (other.clone(), crate::command::CommandKind::Payment(cmd))));
            }
            self.persist_channel(&key)?;
        }
        Ok(followups)
    }
}

fn channel_key(other_encoded: &str) -> String {
    format!("channel/{other_encoded}")
}

fn add_to_roster(storage: &Storage, encoded: &str) -> Result<(), CoreError> {
    storage.atomic_writes(|tx| {
        let mut roster: Vec<String> = tx.get(ROSTER_KEY)?.unwrap_or_default();
        if !roster.iter().any(|a| a == encoded) {
            roster.push(encoded.to_string());
            tx.set(ROSTER_KEY, &roster)?;
        }
        Ok::<(), CoreError>(())
    })
}
