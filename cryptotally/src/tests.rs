use super::*;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn rand_string(n: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

/// Test harness: one mock network, a committee of counters, and a set of
/// voters. Counters and voters can be crashed, restarted, connected, and
/// disconnected while the election runs. Each instance gets a fresh set of
/// end names so a crashed instance's ends stay dead.
struct TestConfig {
    net: Network,
    n_counters: usize,
    n_voters: usize,
    threshold: usize,
    votes: Vec<i64>,
    config: Config,
    counters: Vec<Option<VoteCounter>>,
    voters: Vec<Option<Voter>>,
    counter_connected: Vec<bool>,
    counter_endnames: Vec<Vec<String>>,
    voter_endnames: Vec<Vec<String>>,
    persisters: Vec<MemPersister>,
}

impl TestConfig {
    /// Build a running election: `votes.len()` voters submitting to
    /// `n_counters` counters that expect `n_voters` votes in total.
    fn new(
        n_counters: usize,
        n_voters: usize,
        threshold: usize,
        votes: Vec<i64>,
        unreliable: bool,
    ) -> TestConfig {
        let mut cfg = TestConfig::paused(n_counters, n_voters, threshold, votes, unreliable);
        cfg.launch_voters();
        cfg
    }

    /// Like `new`, but with the committee running and no voter started yet,
    /// so a test can rearrange the committee before voting begins.
    fn paused(
        n_counters: usize,
        n_voters: usize,
        threshold: usize,
        votes: Vec<i64>,
        unreliable: bool,
    ) -> TestConfig {
        init_logging();

        let net = Network::new();
        net.set_reliable(!unreliable);

        let mut cfg = TestConfig {
            net,
            n_counters,
            n_voters,
            threshold,
            config: Config::default(),
            counters: (0..n_counters).map(|_| None).collect(),
            voters: (0..votes.len()).map(|_| None).collect(),
            counter_connected: vec![false; n_counters],
            counter_endnames: vec![Vec::new(); n_counters],
            voter_endnames: vec![Vec::new(); votes.len()],
            persisters: (0..votes.len()).map(|_| MemPersister::new()).collect(),
            votes,
        };

        for i in 0..cfg.n_counters {
            cfg.start_counter(i);
        }
        for i in 0..cfg.n_counters {
            cfg.connect_counter(i);
        }

        cfg
    }

    fn launch_voters(&mut self) {
        for i in 0..self.voters.len() {
            self.start_voter(i);
        }
    }

    fn start_counter(&mut self, i: usize) {
        let endnames: Vec<String> = (0..self.n_counters).map(|_| rand_string(20)).collect();
        let mut ends = Vec::with_capacity(self.n_counters);
        for (j, name) in endnames.iter().enumerate() {
            let end = self.net.make_end(name);
            self.net.connect(name, j);
            ends.push(end);
        }

        let counter = VoteCounter::new(
            ends,
            i,
            self.n_voters,
            self.threshold,
            self.config.clone(),
        )
        .unwrap();
        self.net.add_server(i, Arc::new(counter.clone()));

        self.counter_endnames[i] = endnames;
        self.counters[i] = Some(counter);
    }

    fn start_voter(&mut self, i: usize) {
        let endnames: Vec<String> = (0..self.n_counters).map(|_| rand_string(20)).collect();
        let mut ends = Vec::with_capacity(self.n_counters);
        for (j, name) in endnames.iter().enumerate() {
            let end = self.net.make_end(name);
            self.net.connect(name, j);
            if self.counter_connected[j] {
                self.net.enable(name, true);
            }
            ends.push(end);
        }

        let voter = Voter::new(
            ends,
            self.votes[i],
            self.threshold,
            Arc::new(self.persisters[i].clone()),
            self.config.clone(),
        )
        .unwrap();
        voter.start();

        self.voter_endnames[i] = endnames;
        self.voters[i] = Some(voter);
    }

    /// Attach counter `i` to the network.
    fn connect_counter(&mut self, i: usize) {
        self.counter_connected[i] = true;

        // outgoing ends
        for j in 0..self.n_counters {
            if self.counter_connected[j] {
                let name = self.counter_endnames[i][j].clone();
                self.net.enable(&name, true);
            }
        }

        // incoming peer ends
        for j in 0..self.n_counters {
            if self.counter_connected[j] {
                let name = self.counter_endnames[j][i].clone();
                self.net.enable(&name, true);
            }
        }

        // incoming voter ends
        for j in 0..self.voters.len() {
            if !self.voter_endnames[j].is_empty() {
                let name = self.voter_endnames[j][i].clone();
                self.net.enable(&name, true);
            }
        }
    }

    fn disconnect_counter(&mut self, i: usize) {
        self.counter_connected[i] = false;

        for j in 0..self.n_counters {
            let name = self.counter_endnames[i][j].clone();
            self.net.enable(&name, false);
            let name = self.counter_endnames[j][i].clone();
            self.net.enable(&name, false);
        }
        for j in 0..self.voters.len() {
            if !self.voter_endnames[j].is_empty() {
                let name = self.voter_endnames[j][i].clone();
                self.net.enable(&name, false);
            }
        }
    }

    /// Kill counter `i` and drop its server: in-flight and future calls to
    /// it are lost, and its own ends go dead.
    fn crash_counter(&mut self, i: usize) {
        self.disconnect_counter(i);
        self.net.remove_server(i);
        if let Some(counter) = self.counters[i].take() {
            counter.kill();
        }
    }

    /// Start a fresh instance of counter `i` (counters keep no persistent
    /// state) and attach it.
    fn restart_counter(&mut self, i: usize) {
        self.start_counter(i);
        self.connect_counter(i);
    }

    /// Kill voter `i` and silence its ends.
    fn crash_voter(&mut self, i: usize) {
        if let Some(voter) = self.voters[i].take() {
            voter.kill();
        }
        for j in 0..self.n_counters {
            let name = self.voter_endnames[i][j].clone();
            self.net.enable(&name, false);
        }
    }

    /// Restart voter `i` with its original persister, as a recovering
    /// process would.
    fn restart_voter(&mut self, i: usize) {
        self.start_voter(i);
    }

    /// Poll the committee for a verdict: the first winner in {0, 1} any
    /// counter reports, or -1 if none decides within ten seconds.
    fn vote_result(&self) -> i64 {
        for _ in 0..10 {
            thread::sleep(Duration::from_secs(1));

            for counter in self.counters.iter().flatten() {
                let (done, winner) = counter.done();
                if done && winner != NO_WINNER {
                    return winner;
                }
            }
        }
        NO_WINNER
    }
}

impl Drop for TestConfig {
    fn drop(&mut self) {
        for voter in self.voters.iter().flatten() {
            voter.kill();
        }
        for counter in self.counters.iter().flatten() {
            counter.kill();
        }
    }
}

// ---------------------------------------------------------------------------
// End-to-end elections
// ---------------------------------------------------------------------------

#[test]
fn initial_election_majority_zero() {
    let cfg = TestConfig::new(3, 5, 3, vec![0, 0, 0, 1, 1], false);
    assert_eq!(cfg.vote_result(), 0);
}

#[test]
fn initial_election_majority_one() {
    let cfg = TestConfig::new(3, 5, 3, vec![0, 0, 1, 1, 1], false);
    assert_eq!(cfg.vote_result(), 1);
}

#[test]
fn unreliable_election_majority_zero() {
    let cfg = TestConfig::new(3, 5, 3, vec![0, 0, 0, 1, 1], true);
    assert_eq!(cfg.vote_result(), 0);
}

#[test]
fn unreliable_election_majority_one() {
    let cfg = TestConfig::new(3, 5, 3, vec![0, 0, 1, 1, 1], true);
    assert_eq!(cfg.vote_result(), 1);
}

#[test]
fn unanimous_zero() {
    let cfg = TestConfig::new(3, 4, 2, vec![0, 0, 0, 0], false);
    assert_eq!(cfg.vote_result(), 0);
}

#[test]
fn unanimous_one() {
    let cfg = TestConfig::new(3, 4, 2, vec![1, 1, 1, 1], false);
    assert_eq!(cfg.vote_result(), 1);
}

#[test]
fn tie_is_not_a_majority() {
    // 2 of 4 votes is not strictly more than half.
    let cfg = TestConfig::new(3, 4, 3, vec![0, 0, 1, 1], false);
    assert_eq!(cfg.vote_result(), 0);
}

#[test]
fn bare_majority_wins() {
    let cfg = TestConfig::new(3, 6, 3, vec![1, 0, 1, 0, 1, 1], false);
    assert_eq!(cfg.vote_result(), 1);
}

// ---------------------------------------------------------------------------
// Fault tolerance
// ---------------------------------------------------------------------------

#[test]
fn single_counter_threshold_survives_committee_loss() {
    // With t = 1 a lone counter's own partial sum suffices.
    let mut cfg = TestConfig::paused(3, 4, 1, vec![1, 1, 0, 1], false);
    cfg.crash_counter(1);
    cfg.crash_counter(2);
    cfg.launch_voters();
    assert_eq!(cfg.vote_result(), 1);
}

#[test]
fn full_committee_threshold_fails_on_any_crash() {
    // With t = n every counter is load-bearing.
    let mut cfg = TestConfig::paused(3, 4, 3, vec![1, 1, 1, 0], false);
    cfg.crash_counter(2);
    cfg.launch_voters();
    assert_eq!(cfg.vote_result(), NO_WINNER);

    // The survivors collected every vote but timed out on the exchange.
    for i in 0..2 {
        let counter = cfg.counters[i].as_ref().unwrap();
        assert_eq!(counter.stage(), Stage::Failed);
        assert_eq!(counter.done(), (true, NO_WINNER));
    }
}

#[test]
fn counter_recovery_completes_the_election() {
    // Three of five counters down leaves the survivors below t = 3: no
    // verdict. Restarting one of them mid-flight gets the committee back to
    // threshold, fed by voters that never stopped retrying and by the
    // survivors still offering their partial sums.
    let mut cfg = TestConfig::paused(5, 7, 3, vec![0, 0, 0, 1, 1, 1, 1], false);
    cfg.crash_counter(2);
    cfg.crash_counter(3);
    cfg.crash_counter(4);
    cfg.launch_voters();

    assert_eq!(cfg.vote_result(), NO_WINNER);

    cfg.restart_counter(2);
    assert_eq!(cfg.vote_result(), 1);
}

#[test]
fn election_times_out_without_voters() {
    let cfg = TestConfig::new(3, 2, 2, vec![], false);
    assert_eq!(cfg.vote_result(), NO_WINNER);
    for counter in cfg.counters.iter().flatten() {
        assert_eq!(counter.done(), (true, NO_WINNER));
    }
}

// ---------------------------------------------------------------------------
// Voter persistence
// ---------------------------------------------------------------------------

#[test]
fn restarted_voter_reemits_identical_shares() {
    let mut cfg = TestConfig::new(3, 5, 3, vec![0, 0, 1, 1, 1], false);

    let before = {
        let voter = cfg.voters[4].as_ref().unwrap();
        (voter.voter_id(), voter.shares())
    };
    cfg.crash_voter(4);
    cfg.restart_voter(4);

    let voter = cfg.voters[4].as_ref().unwrap();
    assert_eq!(voter.voter_id(), before.0);
    assert_eq!(voter.shares(), before.1);

    assert_eq!(cfg.vote_result(), 1);
}

#[test]
fn voter_crash_during_unreliable_election() {
    let mut cfg = TestConfig::new(3, 5, 3, vec![0, 0, 0, 1, 1], true);

    thread::sleep(Duration::from_millis(50));
    cfg.crash_voter(0);
    thread::sleep(Duration::from_millis(50));
    cfg.restart_voter(0);

    assert_eq!(cfg.vote_result(), 0);
}

#[test]
fn persisted_record_is_written_before_submission() {
    let cfg = TestConfig::new(3, 3, 2, vec![1, 0, 1], false);

    // Construction already persisted every voter's record.
    for (i, persister) in cfg.persisters.iter().enumerate() {
        let record = VoterRecord::unpack(&persister.read_state().unwrap()).unwrap();
        assert_eq!(record.vote, cfg.votes[i]);
        assert_eq!(record.shares.len(), 3);
    }
}

// ---------------------------------------------------------------------------
// Construction validation
// ---------------------------------------------------------------------------

fn make_ends(net: &Network, n: usize) -> Vec<ClientEnd> {
    (0..n).map(|_| net.make_end(&rand_string(20))).collect()
}

#[test]
fn voter_rejects_out_of_range_threshold() {
    let net = Network::new();
    let persister: Arc<dyn Persister> = Arc::new(MemPersister::new());

    for threshold in [0, 4] {
        let result = Voter::new(
            make_ends(&net, 3),
            1,
            threshold,
            persister.clone(),
            Config::default(),
        );
        assert!(matches!(result, Err(Error::InvalidThreshold { .. })));
    }
}

#[test]
fn voter_rejects_non_binary_vote() {
    let net = Network::new();
    let result = Voter::new(
        make_ends(&net, 3),
        2,
        2,
        Arc::new(MemPersister::new()),
        Config::default(),
    );
    assert!(matches!(result, Err(Error::InvalidVote(2))));
}

#[test]
fn voter_rejects_mismatched_persisted_vote() {
    let net = Network::new();
    let persister = MemPersister::new();

    let voter = Voter::new(
        make_ends(&net, 3),
        1,
        2,
        Arc::new(persister.clone()),
        Config::default(),
    )
    .unwrap();
    voter.kill();

    // Restarting with a different vote is harness misuse and must be fatal.
    let result = Voter::new(
        make_ends(&net, 3),
        0,
        2,
        Arc::new(persister),
        Config::default(),
    );
    assert!(matches!(result, Err(Error::PersistedVoteMismatch)));
}

#[test]
fn voter_rejects_wrong_committee_size_in_record() {
    let net = Network::new();
    let persister = MemPersister::new();
    persister.write_state(
        VoterRecord {
            voter_id: 7,
            vote: 1,
            shares: vec![1, 2],
        }
        .pack(),
    );

    let result = Voter::new(
        make_ends(&net, 3),
        1,
        2,
        Arc::new(persister),
        Config::default(),
    );
    assert!(matches!(
        result,
        Err(Error::PersistedShareCount {
            expected: 3,
            actual: 2
        })
    ));
}

#[test]
fn counter_rejects_out_of_range_threshold() {
    let net = Network::new();
    let result = VoteCounter::new(make_ends(&net, 3), 0, 5, 4, Config::default());
    assert!(matches!(result, Err(Error::InvalidThreshold { .. })));
}

// ---------------------------------------------------------------------------
// Counter RPC semantics
// ---------------------------------------------------------------------------

fn lone_counter(n_voters: usize, threshold: usize) -> VoteCounter {
    let net = Network::new();
    VoteCounter::new(make_ends(&net, 3), 0, n_voters, threshold, Config::default()).unwrap()
}

#[test]
fn duplicate_identical_share_is_idempotent() {
    let counter = lone_counter(2, 2);
    let request = CountVoteRequest {
        voter_id: 11,
        share: 42,
    };

    assert!(counter.count_vote(&request).success);
    assert!(counter.count_vote(&request).success);
    assert_eq!(counter.stage(), Stage::Open);
}

#[test]
fn conflicting_share_is_rejected() {
    let counter = lone_counter(2, 2);
    assert!(
        counter
            .count_vote(&CountVoteRequest {
                voter_id: 11,
                share: 42,
            })
            .success
    );
    assert!(
        !counter
            .count_vote(&CountVoteRequest {
                voter_id: 11,
                share: 43,
            })
            .success
    );

    // The original share survives; the same voter can still re-deliver it.
    assert!(
        counter
            .count_vote(&CountVoteRequest {
                voter_id: 11,
                share: 42,
            })
            .success
    );
}

#[test]
fn votes_are_rejected_after_voting_closes() {
    let counter = lone_counter(1, 1);
    assert!(
        counter
            .count_vote(&CountVoteRequest {
                voter_id: 5,
                share: 9,
            })
            .success
    );
    assert!(counter.stage() >= Stage::Ready);

    let late = counter.count_vote(&CountVoteRequest {
        voter_id: 6,
        share: 1,
    });
    assert!(!late.success);
}

#[test]
fn partial_sums_are_rejected_while_open() {
    let counter = lone_counter(2, 2);
    let reply = counter.count_total(&CountTotalRequest { index: 2, value: 3 });
    assert!(!reply.success);
}

#[test]
fn partial_sum_index_is_bounds_checked() {
    // Threshold 2 keeps the counter waiting in Ready after its own sum.
    let counter = lone_counter(1, 2);
    counter.count_vote(&CountVoteRequest {
        voter_id: 5,
        share: 0,
    });
    assert_eq!(counter.stage(), Stage::Ready);

    for index in [0, 4, -3] {
        let reply = counter.count_total(&CountTotalRequest { index, value: 3 });
        assert!(!reply.success);
    }
    assert!(
        counter
            .count_total(&CountTotalRequest { index: 2, value: 3 })
            .success
    );
}

#[test]
fn lone_counter_with_unit_threshold_decides_alone() {
    let counter = lone_counter(3, 1);
    for (voter_id, share) in [(1, 1), (2, 0), (3, 1)] {
        counter.count_vote(&CountVoteRequest { voter_id, share });
    }

    // local sum 2 of 3 votes: strict majority for 1
    let (done, winner) = counter.done();
    assert!(done);
    assert_eq!(winner, 1);
}
