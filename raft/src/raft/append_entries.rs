use super::{ApplyMsg, Raft, RaftLog, Role};
use crate::proto::*;

impl Raft {
    pub(super) fn handle_append_entries(&mut self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let reject = |term, conflict_index| AppendEntriesReply {
            term,
            success: false,
            conflict_index,
        };
        if args.term < self.term {
            return reject(self.term, 0);
        }
        self.become_follower(args.term);
        self.reset_election_timer();

        let last = self.log.last_index();
        if args.prev_log_index > last {
            return reject(self.term, last + 1);
        }

        let mut prev = args.prev_log_index;
        let mut entries = &args.entries[..];
        if prev < self.log.base() {
            // the prefix is already part of our snapshot.
            let covered = (self.log.base() - prev) as usize;
            entries = entries.get(covered..).unwrap_or(&[]);
            prev = self.log.base();
        } else if self.log.term(prev) != Some(args.prev_log_term) {
            let conflict = self.log.first_index_of_term_at(prev);
            debug!(
                "{} log mismatch at {}, hinting {}",
                self.tag(),
                prev,
                conflict
            );
            return reject(self.term, conflict);
        }

        let mut changed = false;
        for (i, entry) in entries.iter().enumerate() {
            let index = prev + 1 + i as u64;
            match self.log.term(index) {
                Some(term) if term == entry.term => continue,
                Some(_) => self.log.truncate_from(index),
                None => {}
            }
            self.log.extend(entries[i..].iter().cloned());
            changed = true;
            break;
        }
        if changed {
            self.persist();
        }

        let last_new = args.prev_log_index + args.entries.len() as u64;
        let commit = args.leader_commit.min(last_new);
        if commit > self.commit_index {
            self.commit_index = commit;
            self.apply();
        }
        AppendEntriesReply {
            term: self.term,
            success: true,
            conflict_index: 0,
        }
    }

    pub(super) fn handle_append_entries_reply(
        &mut self,
        peer: usize,
        args: &AppendEntriesArgs,
        reply: AppendEntriesReply,
    ) {
        if reply.term > self.term {
            self.become_follower(reply.term);
            self.reset_election_timer();
            return;
        }
        if self.role != Role::Leader || args.term != self.term {
            return;
        }
        if reply.success {
            let matched = args.prev_log_index + args.entries.len() as u64;
            if matched > self.match_index[peer] {
                self.match_index[peer] = matched;
            }
            self.next_index[peer] = self.match_index[peer] + 1;
            self.advance_commit_index();
        } else if reply.conflict_index > 0 {
            self.next_index[peer] = reply.conflict_index.max(self.match_index[peer] + 1);
        }
    }

    pub(super) fn handle_install_snapshot(
        &mut self,
        args: InstallSnapshotArgs,
    ) -> InstallSnapshotReply {
        if args.term < self.term {
            return InstallSnapshotReply { term: self.term };
        }
        self.become_follower(args.term);
        self.reset_election_timer();

        let index = args.last_included_index;
        let term = args.last_included_term;
        if index <= self.commit_index {
            return InstallSnapshotReply { term: self.term };
        }

        if self.log.term(index) == Some(term) {
            self.log.compact_to(index);
        } else {
            self.log = RaftLog::with_base(index, term);
        }
        self.commit_index = index;
        self.last_applied = index;
        self.persist_with_snapshot(args.data.clone());
        info!("{} installed snapshot through {}", self.tag(), index);

        let msg = ApplyMsg::Snapshot {
            data: args.data,
            term,
            index,
        };
        if self.apply_ch.unbounded_send(msg).is_err() {
            debug!("{} apply channel closed", self.tag());
        }
        InstallSnapshotReply { term: self.term }
    }

    pub(super) fn handle_install_snapshot_reply(
        &mut self,
        peer: usize,
        args: &InstallSnapshotArgs,
        reply: InstallSnapshotReply,
    ) {
        if reply.term > self.term {
            self.become_follower(reply.term);
            self.reset_election_timer();
            return;
        }
        if self.role != Role::Leader || args.term != self.term {
            return;
        }
        let index = args.last_included_index;
        if index > self.match_index[peer] {
            self.match_index[peer] = index;
        }
        self.next_index[peer] = self.next_index[peer].max(index + 1);
    }
}
