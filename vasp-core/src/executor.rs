//! Per-channel command sequencing and shared-object bookkeeping.
//!
//! The executor is the append-only log at the heart of a channel: every
//! command that is accepted is appended to `command_sequence`, its
//! dependencies are marked consumed, and the object it produces becomes
//! the new live version of that payment.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::command::{CommandKind, ProtocolCommand};
use crate::error::ExecutorError;
use crate::shared_object::Version;

/// The outcome recorded for a sequenced command, once known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    /// The command has been sequenced but not yet committed or failed.
    Pending,
    /// The command committed successfully.
    Success,
    /// The command failed; the message explains why.
    Failure(String),
}

/// Sequences commands for one channel and tracks shared-object liveness.
///
/// "Live" means the version is the current head of its object's history
/// and may still be depended on by a future command; once a command
/// consumes a version as a dependency, that version is retired.
#[derive(Debug, Default)]
pub struct Executor {
    command_sequence: Vec<CommandKind>,
    command_status_sequence: Vec<CommandStatus>,
    object_liveness: HashMap<Version, bool>,
}

impl Executor {
    /// Creates an empty executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of commands sequenced so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.command_sequence.len()
    }

    /// Whether no commands have been sequenced yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.command_sequence.is_empty()
    }

    /// Returns the command at `seq`, if any.
    #[must_use]
    pub fn get(&self, seq: usize) -> Option<&CommandKind> {
        self.command_sequence.get(seq)
    }

    /// Returns the status of the command at `seq`, if any.
    #[must_use]
    pub fn status(&self, seq: usize) -> Option<&CommandStatus> {
        self.command_status_sequence.get(seq)
    }

    /// Whether `version` is currently live (exists and has not been
    /// consumed as a dependency).
    #[must_use]
    pub fn is_live(&self, version: &str) -> bool {
        self.object_liveness.get(version).copied().unwrap_or(false)
    }

    /// Validates and sequences a new command, returning its assigned
    /// sequence number.
    ///
    /// A brand-new object (no dependencies) is always accepted. An object
    /// derived from existing versions may only be sequenced if every
    /// dependency is currently live; sequencing then retires those
    /// dependencies and marks the command's new version live.
    ///
    /// When `allow_sequence_errors` is `true`, a dependency miss does not
    /// reject the command outright: it is still appended to the sequence,
    /// recorded as [`CommandStatus::Failure`], and its sequence number is
    /// returned. This is used for commands the counterparty proposed, so
    /// both sides of a channel agree on the position of a rejected command
    /// in their shared history, not just the commands that succeeded.
    /// Locally-originated commands should pass `false`, since there is no
    /// peer to agree on a failure's position with yet.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutorError`] if any dependency is missing or no
    /// longer live and `allow_sequence_errors` is `false`.
    pub fn sequence_next_command(
        &mut self,
        command: CommandKind,
        allow_sequence_errors: bool,
    ) -> Result<usize, ExecutorError> {
        let missing_dependency = command
            .dependencies()
            .iter()
            .find(|dep| !self.is_live(dep))
            .cloned();

        if let Some(dep) = missing_dependency {
            if !allow_sequence_errors {
                return Err(ExecutorError::new(format!("dependency '{dep}' is not live"))
                    .with_cid(command.cid().to_string()));
            }
            let seq = self.command_sequence.len();
            self.command_sequence.push(command);
            self.command_status_sequence
                .push(CommandStatus::Failure(format!("dependency '{dep}' is not live")));
            return Ok(seq);
        }

        for dep in command.dependencies() {
            self.object_liveness.insert(dep.clone(), false);
        }
        self.object_liveness
            .insert(command.new_version().clone(), true);

        let seq = self.command_sequence.len();
        self.command_sequence.push(command);
        self.command_status_sequence.push(CommandStatus::Pending);
        Ok(seq)
    }

    /// Marks the command at `seq` as successfully committed.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutorError`] if `seq` is out of range.
    pub fn set_success(&mut self, seq: usize) -> Result<(), ExecutorError> {
        let slot = self
            .command_status_sequence
            .get_mut(seq)
            .ok_or_else(|| ExecutorError::new("no command at that sequence number"))?;
        *slot = CommandStatus::Success;
        Ok(())
    }

    /// Marks the command at `seq` as failed, retiring the liveness it
    /// would otherwise have granted its new version.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutorError`] if `seq` is out of range.
    pub fn set_fail(&mut self, seq: usize, reason: impl Into<String>) -> Result<(), ExecutorError> {
        let command = self
            .command_sequence
            .get(seq)
            .ok_or_else(|| ExecutorError::new("no command at that sequence number"))?;
        self.object_liveness.remove(command.new_version());
        let slot = self
            .command_status_sequence
            .get_mut(seq)
            .expect("status_sequence and command_sequence stay in lockstep");
        *slot = CommandStatus::Failure(reason.into());
        Ok(())
    }

    /// Captures this executor's full state for durable storage.
    #[must_use]
    pub fn snapshot(&self) -> ExecutorSnapshot {
        ExecutorSnapshot {
            command_sequence: self.command_sequence.clone(),
            command_status_sequence: self.command_status_sequence.clone(),
            object_liveness: self.object_liveness.clone(),
        }
    }

    /// Rebuilds an executor from a snapshot previously returned by
    /// [`Self::snapshot`].
    #[must_use]
    pub fn from_snapshot(snapshot: ExecutorSnapshot) -> Self {
        Self {
            command_sequence: snapshot.command_sequence,
            command_status_sequence: snapshot.command_status_sequence,
            object_liveness: snapshot.object_liveness,
        }
    }
}

/// The durable representation of an [`Executor`]'s state, as persisted by a
/// [`Channel`](crate::channel::Channel) between restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSnapshot {
    command_sequence: Vec<CommandKind>,
    command_status_sequence: Vec<CommandStatus>,
    object_liveness: HashMap<Version, bool>,
}
