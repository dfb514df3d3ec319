use crate::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

/// Reported by `done()` while a counter has not decided, and forever if it
/// reached Failed.
pub const NO_WINNER: i64 = -1;

/// A counter's position in the election lifecycle.
///
/// Transitions are monotonic along Open -> Ready -> Counting -> Done.
/// Failed is terminal and reachable only from Open (voting window expired)
/// or Ready (exchange window expired with too few partial sums).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Open,
    Ready,
    Counting,
    Done,
    Failed,
}

/// One committee member.
///
/// Collects exactly one share per voter, sums them into a partial sum,
/// trades partial sums with its peers, and reconstructs the vote total by
/// Lagrange interpolation once `threshold` sums are known. Tolerates up to
/// `n - threshold` peers failing.
#[derive(Clone)]
pub struct VoteCounter {
    inner: Arc<CounterInner>,
}

struct CounterInner {
    me: usize,
    n_voters: usize,
    threshold: usize,
    peers: Vec<ClientEnd>,
    field: Field,
    config: Config,
    killed: AtomicBool,
    state: Mutex<CounterState>,
}

struct CounterState {
    stage: Stage,
    votes: HashMap<i64, i64>,
    partial_sums: HashMap<usize, i64>,
    acked: Vec<bool>,
    n_acked: usize,
    winner: i64,
}

impl VoteCounter {
    /// Create committee member `me` of `peers.len()`. Spawns the election
    /// timer; the rest of the machinery starts when the voter set completes.
    pub fn new(
        peers: Vec<ClientEnd>,
        me: usize,
        n_voters: usize,
        threshold: usize,
        config: Config,
    ) -> Result<VoteCounter, Error> {
        let n = peers.len();
        assert!(me < n, "committee index out of range");

        if threshold < 1 || threshold > n {
            return Err(Error::InvalidThreshold {
                threshold,
                committee: n,
            });
        }

        let counter = VoteCounter {
            inner: Arc::new(CounterInner {
                me,
                n_voters,
                threshold,
                field: Field::new(config.prime),
                config,
                peers,
                killed: AtomicBool::new(false),
                state: Mutex::new(CounterState {
                    stage: Stage::Open,
                    votes: HashMap::new(),
                    partial_sums: HashMap::new(),
                    acked: vec![false; n],
                    n_acked: 0,
                    winner: NO_WINNER,
                }),
            }),
        };

        {
            let counter = counter.clone();
            thread::spawn(move || counter.run_election_timer());
        }

        Ok(counter)
    }

    /// CountVote RPC: record one voter's share.
    ///
    /// Re-delivery of an identical share succeeds without touching state; a
    /// different share under a known voter id is a protocol violation and is
    /// rejected without touching state. Shares are only accepted while the
    /// election is Open.
    pub fn count_vote(&self, request: &CountVoteRequest) -> CountVoteReply {
        if self.killed() {
            return CountVoteReply { success: false };
        }

        let mut state = self.inner.state.lock().unwrap();

        if state.stage != Stage::Open {
            return CountVoteReply { success: false };
        }

        match state.votes.get(&request.voter_id) {
            Some(&share) if share == request.share => {
                return CountVoteReply { success: true };
            }
            Some(_) => {
                warn!(
                    "counter {}: conflicting share from voter {:x}, ignoring",
                    self.inner.me, request.voter_id
                );
                return CountVoteReply { success: false };
            }
            None => {}
        }

        state.votes.insert(request.voter_id, request.share);

        if state.votes.len() == self.inner.n_voters {
            self.close_voting(&mut state);
        }

        CountVoteReply { success: true }
    }

    /// The full voter set is in: sum the shares, move to Ready, and start
    /// the partial-sum exchange.
    fn close_voting(&self, state: &mut MutexGuard<CounterState>) {
        let local_sum = state
            .votes
            .values()
            .fold(0i64, |acc, &share| self.inner.field.add(acc, share));
        state.partial_sums.insert(self.inner.me, local_sum);
        state.stage = Stage::Ready;
        debug!(
            "counter {}: all {} votes in, local sum ready",
            self.inner.me, self.inner.n_voters
        );

        {
            let counter = self.clone();
            thread::spawn(move || counter.broadcast_partial_sum(local_sum));
        }
        {
            let counter = self.clone();
            thread::spawn(move || counter.run_exchange_timer());
        }

        // With threshold 1 our own sum already suffices.
        self.maybe_compute_winner(state);
    }

    /// CountTotal RPC: record a peer's partial sum, keyed by its committee
    /// index.
    ///
    /// Accepted while the exchange is running (Ready or Counting). A peer
    /// resends the same value on every retry, so overwriting an existing
    /// entry is harmless. An index that is not a committee x-coordinate is
    /// rejected.
    pub fn count_total(&self, request: &CountTotalRequest) -> CountTotalReply {
        if self.killed() {
            return CountTotalReply { success: false };
        }

        let mut state = self.inner.state.lock().unwrap();

        if state.stage != Stage::Ready && state.stage != Stage::Counting {
            return CountTotalReply { success: false };
        }
        if request.index < 1 || request.index > self.inner.peers.len() as i64 {
            warn!(
                "counter {}: partial sum with index {} outside the committee",
                self.inner.me, request.index
            );
            return CountTotalReply { success: false };
        }

        state
            .partial_sums
            .insert((request.index - 1) as usize, request.value);
        self.maybe_compute_winner(&mut state);

        CountTotalReply { success: true }
    }

    /// Reconstruct the tally once threshold-many partial sums are known.
    ///
    /// Interpolating at zero over the 1-based committee indices yields the
    /// sum of all votes mod p; since every vote is 0 or 1 the sum lies in
    /// `[0, n_voters]` and a strict-majority comparison decides the winner.
    fn maybe_compute_winner(&self, state: &mut MutexGuard<CounterState>) {
        if state.winner != NO_WINNER || state.partial_sums.len() < self.inner.threshold {
            return;
        }
        if state.stage != Stage::Ready && state.stage != Stage::Counting {
            return;
        }

        state.stage = Stage::Counting;
        let points: Vec<(i64, i64)> = state
            .partial_sums
            .iter()
            .map(|(&index, &value)| (index as i64 + 1, value))
            .collect();
        let total = self.inner.field.interpolate_at_zero(&points);

        state.winner = if total > self.inner.n_voters as i64 / 2 {
            1
        } else {
            0
        };
        state.stage = Stage::Done;
        debug!(
            "counter {}: {} of {} votes cast for 1, winner {}",
            self.inner.me, total, self.inner.n_voters, state.winner
        );
    }

    /// Push our partial sum to every peer until each acknowledges.
    ///
    /// The loop deliberately keeps retrying after this counter reaches a
    /// terminal stage: a peer that crashed and restarted can only recover
    /// the exchange if the survivors are still offering their sums. Every
    /// retransmission carries the same value, so receivers stay consistent.
    fn broadcast_partial_sum(&self, local_sum: i64) {
        let index = self.inner.me as i64 + 1;
        loop {
            if self.killed() {
                return;
            }

            let pending: Vec<usize> = {
                let state = self.inner.state.lock().unwrap();
                if state.n_acked == self.inner.peers.len() {
                    return;
                }
                (0..self.inner.peers.len())
                    .filter(|&peer| !state.acked[peer])
                    .collect()
            };

            for peer in pending {
                let counter = self.clone();
                thread::spawn(move || counter.send_count_total(peer, index, local_sum));
            }

            if !interruptible_sleep(&self.inner.killed, self.inner.config.broadcast_retry) {
                return;
            }
        }
    }

    fn send_count_total(&self, peer: usize, index: i64, value: i64) {
        let request = Request::CountTotal(CountTotalRequest { index, value });
        let reply = self.inner.peers[peer].call(&request);

        if let Some(Reply::CountTotal(reply)) = reply {
            if reply.success {
                let mut state = self.inner.state.lock().unwrap();
                if !state.acked[peer] {
                    state.acked[peer] = true;
                    state.n_acked += 1;
                }
            }
        }
    }

    /// Bound how long we wait for the voter set to complete.
    fn run_election_timer(&self) {
        if !interruptible_sleep(&self.inner.killed, self.inner.config.voting_window) {
            return;
        }

        let mut state = self.inner.state.lock().unwrap();
        if state.stage == Stage::Open {
            warn!(
                "counter {}: voting window expired with {} of {} votes",
                self.inner.me,
                state.votes.len(),
                self.inner.n_voters
            );
            state.stage = Stage::Failed;
        }
    }

    /// Bound how long we wait for threshold-many partial sums.
    fn run_exchange_timer(&self) {
        if !interruptible_sleep(&self.inner.killed, self.inner.config.exchange_window) {
            return;
        }

        let mut state = self.inner.state.lock().unwrap();
        if state.winner != NO_WINNER {
            return;
        }
        if state.partial_sums.len() >= self.inner.threshold {
            self.maybe_compute_winner(&mut state);
        } else if state.stage == Stage::Ready {
            warn!(
                "counter {}: exchange window expired with {} of {} partial sums",
                self.inner.me,
                state.partial_sums.len(),
                self.inner.threshold
            );
            state.stage = Stage::Failed;
        }
    }

    /// Whether this counter has reached a terminal stage, and the winner.
    ///
    /// A Failed counter reports `(true, NO_WINNER)`: decided, no winner.
    pub fn done(&self) -> (bool, i64) {
        let state = self.inner.state.lock().unwrap();
        match state.stage {
            Stage::Done => (true, state.winner),
            Stage::Failed => (true, NO_WINNER),
            _ => (false, NO_WINNER),
        }
    }

    pub fn stage(&self) -> Stage {
        self.inner.state.lock().unwrap().stage
    }

    pub fn me(&self) -> usize {
        self.inner.me
    }

    pub fn kill(&self) {
        self.inner.killed.store(true, Ordering::SeqCst);
    }

    fn killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }
}

impl Service for VoteCounter {
    fn dispatch(&self, request: Request) -> Reply {
        match request {
            Request::CountVote(request) => Reply::CountVote(self.count_vote(&request)),
            Request::CountTotal(request) => Reply::CountTotal(self.count_total(&request)),
        }
    }
}
