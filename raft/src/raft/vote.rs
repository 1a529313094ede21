use super::{Raft, Role};
use crate::proto::{RequestVoteArgs, RequestVoteReply};

impl Raft {
    pub(super) fn handle_request_vote(&mut self, args: RequestVoteArgs) -> RequestVoteReply {
        if args.term > self.term {
            self.become_follower(args.term);
        }
        let candidate = args.candidate_id as usize;
        let up_to_date = (args.last_log_term, args.last_log_index)
            >= (self.log.last_term(), self.log.last_index());
        let vote_granted = args.term == self.term
            && self.voted_for.map_or(true, |v| v == candidate)
            && up_to_date;

        if vote_granted {
            self.voted_for = Some(candidate);
            self.persist();
            self.reset_election_timer();
            debug!("{} votes for {}", self.tag(), candidate);
        }
        RequestVoteReply {
            term: self.term,
            vote_granted,
        }
    }

    /// Counts a vote cast in `term`. Returns true if it made this peer leader.
    pub(super) fn handle_request_vote_reply(&mut self, term: u64, reply: RequestVoteReply) -> bool {
        if reply.term > self.term {
            self.become_follower(reply.term);
            self.reset_election_timer();
            return false;
        }
        if self.role != Role::Candidate || term != self.term || !reply.vote_granted {
            return false;
        }
        self.votes += 1;
        if self.is_quorum(self.votes) {
            self.become_leader();
            return true;
        }
        false
    }
}
