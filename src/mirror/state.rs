// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local view of a device's address-list, fed by replies.
//!
//! [`MirrorState`] turns parsed replies into map updates and reports what
//! the caller must signal ([`Effects`]). It does no I/O and takes no locks.
//!
//! # Records and indexes
//!
//! Records are owned by the `.id` map; the key index maps each address to the
//! `.id` of its record. Both are only modified together, through
//! `insert_record` and `remove_record`, so every key resolves to exactly one
//! live record.
//!
//! # Reconciliation
//!
//! After (re)connecting, the change stream (`LISTEN`) is started before the
//! bulk snapshot (`FETCH`), and both arrive interleaved on one connection.
//! While reconciling:
//!
//! ```text
//!  FETCH !re   ──► accept unless the key or .id is already known,
//!                  or the .id was reported dead by LISTEN
//!  LISTEN dead ──► remove if known; remember the .id as tentatively
//!                  removed if the snapshot has not produced it yet
//!  LISTEN add  ──► insert or update in place (always wins)
//!  FETCH !done ──► back to Normal, forget tentatively removed ids
//! ```
//!
//! The change stream is current truth; the snapshot is a stale point-in-time
//! read, so the stream wins whichever arrives first.
//!
//! # Visibility
//!
//! Only entries whose list matches the pattern are mirrored. A stream update
//! that moves an entry to a non-matching list is handled like a removal.

use super::commands;
use crate::error::MirrorError;
use crate::routeros::sentence::{command_tag, Marker, Reply, Sentence, TagClass};
use crate::store::Entries;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// One address-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Device-assigned `.id`, immutable.
    pub id: String,
    /// The address.
    pub key: String,
    /// The list name.
    pub value: String,
}

/// Whether a snapshot is being merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Reconciling {
        /// Ids the stream reported dead before the snapshot produced them.
        tentatively_removed: HashSet<String>,
        /// Ids the snapshot has produced so far.
        fetched: HashSet<String>,
    },
}

/// A mutation sent to the device and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCommand {
    Add { key: String, value: String },
    Set { id: String, value: String },
    Remove { id: String },
}

/// What the caller has to do after a reply was applied.
#[derive(Debug, Default)]
#[must_use]
pub struct Effects {
    /// Wake `watch()`.
    pub changed: bool,
    /// Release the store lock held for the reconciliation sweep.
    pub reconcile_complete: bool,
    /// Something the device reported that did not change the mirror.
    ///
    /// Retryable faults mean the session has to be rebuilt.
    pub fault: Option<MirrorError>,
}

impl Effects {
    fn changed() -> Self {
        Self {
            changed: true,
            ..Self::default()
        }
    }

    fn fault(error: MirrorError) -> Self {
        Self {
            fault: Some(error),
            ..Self::default()
        }
    }

    /// Nothing to signal.
    pub fn is_noop(&self) -> bool {
        !self.changed && !self.reconcile_complete && self.fault.is_none()
    }
}

/// Mirror maps, pending commands and reconciliation mode.
#[derive(Debug)]
pub struct MirrorState {
    records: HashMap<String, Record>,
    by_key: BTreeMap<String, String>,
    pending: HashMap<u64, PendingCommand>,
    mode: Mode,
    next_tag: u64,
    pattern: Regex,
}

impl MirrorState {
    pub fn new(pattern: Regex) -> Self {
        Self {
            records: HashMap::new(),
            by_key: BTreeMap::new(),
            pending: HashMap::new(),
            mode: Mode::Normal,
            next_tag: 0,
            pattern,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.by_key.get(key).and_then(|id| self.records.get(id))
    }

    pub fn record_by_id(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// `(key, value)` pairs ordered by key.
    pub fn entries(&self) -> Entries {
        self.by_key
            .iter()
            .filter_map(|(key, id)| self.records.get(id).map(|r| (key.clone(), r.value.clone())))
            .collect()
    }

    /// All records, ordered by key.
    pub fn records(&self) -> Vec<Record> {
        self.by_key
            .values()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn is_reconciling(&self) -> bool {
        matches!(self.mode, Mode::Reconciling { .. })
    }

    /// Empty unless reconciling.
    pub fn tentatively_removed(&self) -> HashSet<String> {
        match &self.mode {
            Mode::Reconciling {
                tentatively_removed,
                ..
            } => tentatively_removed.clone(),
            Mode::Normal => HashSet::new(),
        }
    }

    /// Both indexes describe the same set of records.
    pub fn is_consistent(&self) -> bool {
        self.by_key.len() == self.records.len()
            && self.by_key.iter().all(|(key, id)| {
                self.records
                    .get(id)
                    .is_some_and(|r| &r.key == key && &r.id == id)
            })
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Start a reconciliation sweep from an empty mirror.
    ///
    /// Commands pending from a previous session can never be acknowledged
    /// and are discarded; the number discarded is returned.
    pub fn enter_reconciling(&mut self) -> usize {
        self.records.clear();
        self.by_key.clear();
        let discarded = self.clear_pending();
        self.mode = Mode::Reconciling {
            tentatively_removed: HashSet::new(),
            fetched: HashSet::new(),
        };
        discarded
    }

    /// Session lost: drop in-flight commands.
    ///
    /// An unfinished sweep stays open, so the mode remains `Reconciling`
    /// until a later snapshot completes. Records are kept until the next
    /// sweep replaces them.
    pub fn end_session(&mut self) -> usize {
        self.clear_pending()
    }

    fn clear_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    fn exit_reconciling(&mut self) {
        self.mode = Mode::Normal;
    }

    // =========================================================================
    // Reply dispatch
    // =========================================================================

    /// Apply one reply, in arrival order.
    pub fn dispatch(&mut self, reply: &Reply) -> Effects {
        if reply.marker() == Marker::Fatal {
            return Effects::fault(MirrorError::ProtocolFatal {
                message: reply.message(),
            });
        }
        let Some(class) = reply.tag_class() else {
            debug!(reply = %reply, "Dropping untagged reply");
            return Effects::default();
        };
        match class {
            TagClass::Fetch => self.on_fetch(reply),
            TagClass::Listen => self.on_listen(reply),
            TagClass::Command(tag) => self.on_command(tag, reply),
            TagClass::Unrecognized => {
                debug!(reply = %reply, "Dropping reply with unrecognized tag");
                Effects::default()
            }
        }
    }

    fn on_fetch(&mut self, reply: &Reply) -> Effects {
        match reply.marker() {
            Marker::Re => {
                self.accept_snapshot_record(reply);
                Effects::default()
            }
            Marker::Done if self.is_reconciling() => {
                self.exit_reconciling();
                info!(entries = self.len(), "Snapshot merged");
                Effects {
                    changed: true,
                    reconcile_complete: true,
                    ..Effects::default()
                }
            }
            Marker::Trap => Effects::fault(stream_ended("FETCH", reply)),
            _ => {
                debug!(reply = %reply, "Ignoring snapshot reply outside reconciliation");
                Effects::default()
            }
        }
    }

    fn accept_snapshot_record(&mut self, reply: &Reply) {
        let Mode::Reconciling {
            tentatively_removed,
            fetched,
        } = &mut self.mode
        else {
            debug!(reply = %reply, "Rejecting snapshot record outside reconciliation");
            return;
        };
        let (Some(id), Some(key), Some(value)) =
            (reply.get(".id"), reply.get("address"), reply.get("list"))
        else {
            debug!(reply = %reply, "Snapshot record without .id/address/list");
            return;
        };
        fetched.insert(id.to_string());
        if tentatively_removed.contains(id) {
            debug!(key, id, "Stream already reported this id dead");
            return;
        }
        if self.by_key.contains_key(key) || self.records.contains_key(id) {
            debug!(key, id, "Stream already produced this entry");
            return;
        }
        if !self.pattern.is_match(value) {
            return;
        }
        self.insert_record(Record {
            id: id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn on_listen(&mut self, reply: &Reply) -> Effects {
        match reply.marker() {
            Marker::Re if reply.has(".dead") => self.on_stream_removal(reply),
            Marker::Re => self.on_stream_upsert(reply),
            Marker::Done | Marker::Trap => Effects::fault(stream_ended("LISTEN", reply)),
            _ => {
                debug!(reply = %reply, "Ignoring change stream reply");
                Effects::default()
            }
        }
    }

    fn on_stream_removal(&mut self, reply: &Reply) -> Effects {
        let Some(id) = reply.get(".id") else {
            debug!(reply = %reply, "Removal without .id");
            return Effects::default();
        };
        self.hide(id)
    }

    /// Drop `id` from the mirror and keep the snapshot from bringing it back.
    fn hide(&mut self, id: &str) -> Effects {
        let removed = self.remove_record(id).is_some();
        if let Mode::Reconciling {
            tentatively_removed,
            fetched,
        } = &mut self.mode
        {
            if !fetched.contains(id) {
                debug!(id, "Removed before snapshot produced it");
                tentatively_removed.insert(id.to_string());
            }
        }
        if removed {
            debug!(id, "Removed by stream");
            return Effects::changed();
        }
        Effects::default()
    }

    fn on_stream_upsert(&mut self, reply: &Reply) -> Effects {
        let (Some(id), Some(key), Some(value)) =
            (reply.get(".id"), reply.get("address"), reply.get("list"))
        else {
            debug!(reply = %reply, "Stream record without .id/address/list");
            return Effects::default();
        };
        if !self.pattern.is_match(value) {
            return self.hide(id);
        }

        if self.by_key.get(key).map(String::as_str) == Some(id) {
            let Some(record) = self.records.get_mut(id) else {
                return Effects::default();
            };
            if record.value == value {
                return Effects::default();
            }
            debug!(key, from = %record.value, to = value, "Updated by stream");
            record.value = value.to_string();
            return Effects::changed();
        }

        debug!(key, id, value, "Added by stream");
        self.insert_record(Record {
            id: id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        Effects::changed()
    }

    fn on_command(&mut self, tag: u64, reply: &Reply) -> Effects {
        let unknown = || Effects::fault(MirrorError::UnknownTag(command_tag(tag)));
        match reply.marker() {
            Marker::Done => match self.pending.remove(&tag) {
                Some(command) => {
                    self.apply_acknowledged(command, reply);
                    Effects::default()
                }
                None => unknown(),
            },
            Marker::Trap => match self.pending.remove(&tag) {
                Some(command) => {
                    debug!(tag, ?command, "Dropping rejected command");
                    Effects::fault(MirrorError::Trap {
                        tag: command_tag(tag),
                        message: reply.message(),
                    })
                }
                None => unknown(),
            },
            _ => {
                debug!(tag, reply = %reply, "Ignoring intermediate command reply");
                Effects::default()
            }
        }
    }

    /// Local effect of a command the device accepted.
    fn apply_acknowledged(&mut self, command: PendingCommand, reply: &Reply) {
        match command {
            PendingCommand::Add { key, value } => {
                let Some(id) = reply.get("ret") else {
                    warn!(key, "Add acknowledged without an id");
                    return;
                };
                if !self.pattern.is_match(&value) {
                    debug!(key, value, "Added entry is outside the pattern");
                    return;
                }
                self.insert_record(Record {
                    id: id.to_string(),
                    key,
                    value,
                });
            }
            PendingCommand::Set { id, value } if !self.pattern.is_match(&value) => {
                debug!(id, value, "Entry moved outside the pattern");
                self.remove_record(&id);
            }
            PendingCommand::Set { id, value } => match self.records.get_mut(&id) {
                Some(record) => record.value = value,
                None => debug!(id, "Set acknowledged for a record already gone"),
            },
            PendingCommand::Remove { id } => {
                self.remove_record(&id);
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn allocate_tag(&mut self) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    /// Register an add (unknown key) or set (known key) and build its request.
    pub fn prepare_set(&mut self, key: &str, value: &str, timeout: Option<&str>) -> (u64, Sentence) {
        let tag = self.allocate_tag();
        let (command, sentence) = match self.get(key) {
            Some(record) => (
                PendingCommand::Set {
                    id: record.id.clone(),
                    value: value.to_string(),
                },
                commands::set(tag, &record.id, value, timeout),
            ),
            None => (
                PendingCommand::Add {
                    key: key.to_string(),
                    value: value.to_string(),
                },
                commands::add(tag, key, value, timeout),
            ),
        };
        self.pending.insert(tag, command);
        (tag, sentence)
    }

    /// Register a remove; `None` if the key is not mirrored.
    pub fn prepare_delete(&mut self, key: &str) -> Option<(u64, Sentence)> {
        let id = self.get(key)?.id.clone();
        let tag = self.allocate_tag();
        let sentence = commands::remove(tag, &id);
        self.pending.insert(tag, PendingCommand::Remove { id });
        Some((tag, sentence))
    }

    /// Forget a command whose request never reached the device.
    pub fn abandon(&mut self, tag: u64) {
        self.pending.remove(&tag);
    }

    // =========================================================================
    // Index maintenance
    // =========================================================================

    fn insert_record(&mut self, record: Record) {
        // A key maps to one record; a stale record for it is replaced.
        if let Some(old_id) = self.by_key.get(&record.key).cloned() {
            if old_id != record.id {
                self.records.remove(&old_id);
            }
        }
        if let Some(old) = self.records.get(&record.id) {
            if old.key != record.key {
                self.by_key.remove(&old.key);
            }
        }
        self.by_key.insert(record.key.clone(), record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    fn remove_record(&mut self, id: &str) -> Option<Record> {
        let record = self.records.remove(id)?;
        self.by_key.remove(&record.key);
        Some(record)
    }
}

fn stream_ended(job: &str, reply: &Reply) -> MirrorError {
    MirrorError::StreamEnded {
        job: job.to_string(),
        message: reply.message(),
    }
}
