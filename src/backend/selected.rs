//! The selection: per-session state of the open mailbox.
//!
//! A [`SelectedMailbox`] remembers what this session has been told about the
//! mailbox so far. [`SelectedMailbox::fork`] diffs that memory against a
//! fresh [`MailboxView`] and produces the untagged responses owed to the
//! client, in the fixed order EXISTS, RECENT, EXPUNGE (descending), FETCH.

use std::collections::{HashMap, HashSet};

use lettermill_types::fetch::MessageDataItem;
use lettermill_types::flag::Flag;
use lettermill_types::mailbox::Mailbox;
use lettermill_types::response::{Data, Untagged};
use lettermill_types::sequence::SequenceSet;

use crate::backend::{MailboxUpdate, MailboxView};

/// How much of a pending mailbox change a fork may reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkMode {
    /// Everything: EXISTS/RECENT changes, EXPUNGEs, flag updates.
    Full,
    /// Only flag updates; expunges and count changes stay pending. Used for
    /// the non-UID FETCH/STORE/SEARCH commands, which must not renumber
    /// messages mid-command.
    DeferExpunges,
}

/// Outcome of resolving a sequence set against the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMessage {
    pub seq: u32,
    pub uid: u32,
    /// Last reported flags; authoritative only when `expunged`.
    pub flags: Vec<Flag>,
    /// The message is gone from the store but still addressable here.
    pub expunged: bool,
}

#[derive(Debug, Clone)]
pub struct SelectedMailbox {
    name: Mailbox,
    readonly: bool,
    uid_validity: u32,
    /// `(uid, last reported flags)` in sequence order. Retains expunged
    /// entries until an EXPUNGE response for them has been sent.
    snapshot: Vec<(u32, Vec<Flag>)>,
    /// UIDs carrying the session `\Recent` flag.
    recent: HashSet<u32>,
    reported_recent: u32,
    /// Change counter of the last view folded in.
    epoch: u64,
    /// Set while a `UID` command runs: expunged messages stay addressable.
    pub hide_expunged: bool,
    /// UIDs whose next flag echo is suppressed (`STORE ... .SILENT`).
    silenced: HashSet<u32>,
}

impl SelectedMailbox {
    /// Build the selection from the SELECT/EXAMINE view. No untagged diffs
    /// come out of this; the SELECT response reports the initial state.
    pub fn new(view: &MailboxView, claimed: Vec<u32>, readonly: bool) -> Self {
        let recent: HashSet<u32> = claimed.into_iter().collect();
        let snapshot = view
            .messages
            .iter()
            .map(|message| {
                (
                    message.uid,
                    effective_flags(&message.flags, recent.contains(&message.uid)),
                )
            })
            .collect();
        Self {
            name: view.name.clone(),
            readonly,
            uid_validity: view.uid_validity,
            snapshot,
            reported_recent: recent.len() as u32,
            recent,
            epoch: view.epoch,
            hide_expunged: false,
            silenced: HashSet::new(),
        }
    }

    pub fn name(&self) -> &Mailbox {
        &self.name
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Count of messages carrying the session `\Recent` flag.
    pub fn recent_count(&self) -> u32 {
        self.reported_recent
    }

    /// UIDs in sequence order, expunged-but-unreported entries included.
    pub fn seq_uids(&self) -> Vec<u32> {
        self.snapshot.iter().map(|(uid, _)| *uid).collect()
    }

    /// UIDs with the session `\Recent` flag, for search evaluation.
    pub fn recent_uids(&self) -> Vec<u32> {
        self.recent.iter().copied().collect()
    }

    pub fn seq_of_uid(&self, uid: u32) -> Option<u32> {
        self.snapshot
            .iter()
            .position(|(known, _)| *known == uid)
            .map(|index| index as u32 + 1)
    }

    /// Suppress the next flag echo for these UIDs.
    pub fn silence(&mut self, uids: &[u32]) {
        self.silenced.extend(uids.iter().copied());
    }

    /// Resolve a sequence set against the selection, in sequence-number or
    /// UID space. `current` tells which UIDs still exist in the store;
    /// messages missing from it resolve as expunged.
    pub fn resolve(
        &self,
        sequence_set: &SequenceSet,
        uid_mode: bool,
        current: &HashSet<u32>,
    ) -> Vec<ResolvedMessage> {
        let mut resolved = Vec::new();
        for (index, (uid, flags)) in self.snapshot.iter().enumerate() {
            let seq = index as u32 + 1;
            let selected = if uid_mode {
                let largest = self.snapshot.last().map(|(uid, _)| *uid).unwrap_or(0);
                sequence_set.contains(*uid, largest)
            } else {
                sequence_set.contains(seq, self.snapshot.len() as u32)
            };
            if !selected {
                continue;
            }
            let expunged = !current.contains(uid);
            if expunged && !self.hide_expunged {
                // Without the UID gate the message simply no longer matches.
                continue;
            }
            resolved.push(ResolvedMessage {
                seq,
                uid: *uid,
                flags: flags.clone(),
                expunged,
            });
        }
        resolved
    }

    /// Effective flags to report for a stored flag set in this session.
    pub fn flags_for(&self, uid: u32, stored: &[Flag]) -> Vec<Flag> {
        effective_flags(stored, self.recent.contains(&uid))
    }

    /// Fold a fresh view in and emit the untagged responses owed.
    ///
    /// Returns `None` when the mailbox no longer exists (deleted or renamed
    /// away beneath the selection).
    pub fn fork(
        &mut self,
        update: &MailboxUpdate,
        mode: ForkMode,
    ) -> Option<Vec<Untagged>> {
        let view = update.view.as_ref()?;
        self.recent.extend(update.claimed.iter().copied());
        self.epoch = view.epoch;

        let current: HashMap<u32, &Vec<Flag>> = view
            .messages
            .iter()
            .map(|message| (message.uid, &message.flags))
            .collect();

        let mut untagged = Vec::new();

        // Flag echoes always compare against what was last reported.
        let mut fetches: Vec<(u32, Vec<Flag>)> = Vec::new();
        let known: HashSet<u32> =
            self.snapshot.iter().map(|(uid, _)| *uid).collect();
        for (uid, stored) in view
            .messages
            .iter()
            .map(|message| (message.uid, &message.flags))
        {
            let effective = effective_flags(stored, self.recent.contains(&uid));
            let previous = self
                .snapshot
                .iter()
                .find(|(known, _)| *known == uid)
                .map(|(_, flags)| flags);
            let changed = previous != Some(&effective);
            let is_new = !known.contains(&uid);
            if (changed || is_new) && !self.silenced.remove(&uid) {
                fetches.push((uid, effective));
            }
        }

        if mode == ForkMode::DeferExpunges {
            // Update flag memory for present messages, leave the rest of the
            // snapshot (and the counters) untouched until a full fork runs.
            for (uid, flags) in &mut self.snapshot {
                if let Some(stored) = current.get(uid) {
                    *flags =
                        effective_flags(stored, self.recent.contains(uid));
                }
            }
            for (uid, effective) in fetches {
                if let Some(seq) = self.seq_of_uid(uid) {
                    untagged.push(flags_fetch(seq, effective));
                }
            }
            return Some(untagged);
        }

        // Expunged messages: snapshot positions, reported highest-first so
        // the remaining numbers stay valid.
        let expunged_seqs: Vec<u32> = self
            .snapshot
            .iter()
            .enumerate()
            .filter(|(_, (uid, _))| !current.contains_key(uid))
            .map(|(index, _)| index as u32 + 1)
            .collect();

        self.recent
            .retain(|uid| current.contains_key(uid));

        let exists = view.exists();
        let recent = self.recent.len() as u32;
        let has_new = view
            .messages
            .iter()
            .any(|message| !known.contains(&message.uid));
        if exists != self.snapshot.len() as u32
            || (has_new && !expunged_seqs.is_empty())
        {
            untagged.push(Untagged::Data(Data::Exists(exists)));
        }
        if recent != self.reported_recent {
            untagged.push(Untagged::Data(Data::Recent(recent)));
        }
        for seq in expunged_seqs.iter().rev() {
            untagged.push(Untagged::Data(Data::Expunge(*seq)));
        }

        // Rebuild the snapshot in the view's order, then attach flag echoes
        // with their post-expunge sequence numbers.
        self.snapshot = view
            .messages
            .iter()
            .map(|message| {
                (
                    message.uid,
                    effective_flags(
                        &message.flags,
                        self.recent.contains(&message.uid),
                    ),
                )
            })
            .collect();
        self.reported_recent = recent;

        for (uid, effective) in fetches {
            if let Some(seq) = self.seq_of_uid(uid) {
                untagged.push(flags_fetch(seq, effective));
            }
        }

        Some(untagged)
    }
}

fn effective_flags(stored: &[Flag], recent: bool) -> Vec<Flag> {
    let mut flags: Vec<Flag> = stored
        .iter()
        .filter(|flag| !flag.is_recent())
        .cloned()
        .collect();
    if recent {
        flags.push(Flag::Recent);
    }
    flags.sort();
    flags.dedup();
    flags
}

fn flags_fetch(seq: u32, flags: Vec<Flag>) -> Untagged {
    Untagged::Data(Data::Fetch {
        seq,
        items: vec![MessageDataItem::Flags(flags)],
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backend::MessageSummary;

    fn view(uids_flags: &[(u32, &[Flag])], next_uid: u32, epoch: u64) -> MailboxView {
        MailboxView {
            name: Mailbox::Inbox,
            uid_validity: 4200,
            next_uid,
            epoch,
            recent: 0,
            flags: vec![],
            messages: uids_flags
                .iter()
                .map(|(uid, flags)| MessageSummary {
                    uid: *uid,
                    flags: flags.to_vec(),
                })
                .collect(),
        }
    }

    fn update(view: MailboxView, claimed: &[u32]) -> MailboxUpdate {
        MailboxUpdate {
            view: Some(view),
            claimed: claimed.to_vec(),
        }
    }

    fn seeded() -> SelectedMailbox {
        // Four messages, UID 104 recent, like the demo INBOX.
        let initial = view(
            &[
                (101, &[Flag::Seen]),
                (102, &[]),
                (103, &[Flag::Seen]),
                (104, &[]),
            ],
            105,
            1,
        );
        SelectedMailbox::new(&initial, vec![104], false)
    }

    #[test]
    fn append_emits_exists_recent_fetch() {
        let mut selected = seeded();
        let next = view(
            &[
                (101, &[Flag::Seen]),
                (102, &[]),
                (103, &[Flag::Seen]),
                (104, &[]),
                (105, &[Flag::Seen]),
            ],
            106,
            2,
        );
        let untagged = selected
            .fork(&update(next, &[105]), ForkMode::Full)
            .unwrap();
        assert_eq!(
            untagged,
            vec![
                Untagged::Data(Data::Exists(5)),
                Untagged::Data(Data::Recent(2)),
                Untagged::Data(Data::Fetch {
                    seq: 5,
                    items: vec![MessageDataItem::Flags(vec![
                        Flag::Recent,
                        Flag::Seen,
                    ])],
                }),
            ]
        );
    }

    #[test]
    fn expunge_emits_exists_recent_expunge_in_order() {
        let mut selected = seeded();
        let next = view(
            &[
                (101, &[Flag::Seen]),
                (102, &[]),
                (103, &[Flag::Seen]),
            ],
            105,
            2,
        );
        let untagged = selected
            .fork(&update(next, &[]), ForkMode::Full)
            .unwrap();
        assert_eq!(
            untagged,
            vec![
                Untagged::Data(Data::Exists(3)),
                Untagged::Data(Data::Recent(0)),
                Untagged::Data(Data::Expunge(4)),
            ]
        );
    }

    #[test]
    fn multiple_expunges_descend() {
        let mut selected = seeded();
        let next = view(&[(102, &[]), (103, &[Flag::Seen])], 105, 2);
        let untagged = selected
            .fork(&update(next, &[]), ForkMode::Full)
            .unwrap();
        assert_eq!(
            untagged,
            vec![
                Untagged::Data(Data::Exists(2)),
                Untagged::Data(Data::Recent(0)),
                Untagged::Data(Data::Expunge(4)),
                Untagged::Data(Data::Expunge(1)),
            ]
        );
    }

    #[test]
    fn silenced_store_suppresses_echo_once() {
        let mut selected = seeded();
        selected.silence(&[101]);
        let next = view(
            &[
                (101, &[Flag::Deleted, Flag::Seen]),
                (102, &[]),
                (103, &[Flag::Seen]),
                (104, &[]),
            ],
            105,
            2,
        );
        let untagged = selected
            .fork(&update(next.clone(), &[]), ForkMode::Full)
            .unwrap();
        assert_eq!(untagged, vec![]);

        // The change was folded in: a repeat view stays quiet too.
        let untagged = selected
            .fork(&update(next, &[]), ForkMode::Full)
            .unwrap();
        assert_eq!(untagged, vec![]);
    }

    #[test]
    fn defer_mode_reports_only_flag_changes() {
        let mut selected = seeded();
        let next = view(
            &[(101, &[Flag::Seen]), (102, &[Flag::Seen]), (103, &[Flag::Seen])],
            105,
            2,
        );
        let untagged = selected
            .fork(&update(next, &[]), ForkMode::DeferExpunges)
            .unwrap();
        // UID 104 vanished but no EXPUNGE (or EXISTS) may appear here.
        assert_eq!(
            untagged,
            vec![Untagged::Data(Data::Fetch {
                seq: 2,
                items: vec![MessageDataItem::Flags(vec![Flag::Seen])],
            })]
        );

        // The pending expunge surfaces on the next full fork.
        let next = view(
            &[(101, &[Flag::Seen]), (102, &[Flag::Seen]), (103, &[Flag::Seen])],
            105,
            2,
        );
        let untagged = selected
            .fork(&update(next, &[]), ForkMode::Full)
            .unwrap();
        assert_eq!(
            untagged,
            vec![
                Untagged::Data(Data::Exists(3)),
                Untagged::Data(Data::Recent(0)),
                Untagged::Data(Data::Expunge(4)),
            ]
        );
    }

    #[test]
    fn deleted_mailbox_folds_to_none() {
        let mut selected = seeded();
        let gone = MailboxUpdate {
            view: None,
            claimed: vec![],
        };
        assert!(selected.fork(&gone, ForkMode::Full).is_none());
    }
}
