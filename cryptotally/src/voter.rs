use crate::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// A voter holds one private binary vote, splits it into per-counter Shamir
/// shares, and drives at-least-once delivery of each share to its counter.
///
/// The shares are persisted before any of them leaves the process, so a
/// voter that crashes and restarts with the same persister re-emits exactly
/// the shares it emitted before, under the same voter id. Fresh shares after
/// a restart would mix evaluations of two different polynomials into the
/// counters' sums and destroy the tally.
#[derive(Clone)]
pub struct Voter {
    inner: Arc<VoterInner>,
}

struct VoterInner {
    voter_id: i64,
    vote: i64,
    committee: Vec<ClientEnd>,
    config: Config,
    killed: AtomicBool,
    submission: Mutex<Submission>,
}

struct Submission {
    shares: Vec<i64>,
    acked: Vec<bool>,
    n_acked: usize,
}

impl Voter {
    /// Create a voter with one end per committee member.
    ///
    /// If the persister holds a previous record, its shares and voter id are
    /// adopted; the record's vote must match `vote` and the share vector must
    /// match the committee size, otherwise the voter refuses to start.
    /// Otherwise a fresh polynomial is drawn and the record is written before
    /// this constructor returns.
    pub fn new(
        committee: Vec<ClientEnd>,
        vote: i64,
        threshold: usize,
        persister: Arc<dyn Persister>,
        config: Config,
    ) -> Result<Voter, Error> {
        let n = committee.len();

        if vote != 0 && vote != 1 {
            return Err(Error::InvalidVote(vote));
        }
        if threshold < 1 || threshold > n {
            return Err(Error::InvalidThreshold {
                threshold,
                committee: n,
            });
        }

        let record = match persister.read_state() {
            Some(data) if !data.is_empty() => {
                let record = VoterRecord::unpack(&data)?;
                if record.vote != vote {
                    return Err(Error::PersistedVoteMismatch);
                }
                if record.shares.len() != n {
                    return Err(Error::PersistedShareCount {
                        expected: n,
                        actual: record.shares.len(),
                    });
                }
                debug!("voter {:x}: recovered persisted shares", record.voter_id);
                record
            }
            _ => {
                let field = Field::new(config.prime);
                let polynomial = SecretPolynomial::random(&field, vote, threshold);
                let record = VoterRecord {
                    voter_id: random_voter_id(),
                    vote,
                    shares: polynomial.shares(n),
                };
                // The shares must be durable before any of them is sent.
                persister.write_state(record.pack());
                record
            }
        };

        Ok(Voter {
            inner: Arc::new(VoterInner {
                voter_id: record.voter_id,
                vote: record.vote,
                committee,
                config,
                killed: AtomicBool::new(false),
                submission: Mutex::new(Submission {
                    acked: vec![false; record.shares.len()],
                    n_acked: 0,
                    shares: record.shares,
                }),
            }),
        })
    }

    /// Spawn the submission loop on its own thread.
    pub fn start(&self) -> thread::JoinHandle<()> {
        let voter = self.clone();
        thread::spawn(move || voter.submit_shares())
    }

    /// Drive delivery of every share to its counter.
    ///
    /// Each cycle dispatches one CountVote per unacknowledged counter, then
    /// sleeps for the retry cadence. Only a `success = true` reply counts as
    /// delivered; timeouts, losses, and rejections are retried next cycle.
    /// Returns once every counter has acknowledged or the voter is killed.
    pub fn submit_shares(&self) {
        loop {
            if self.killed() {
                return;
            }

            let pending: Vec<(usize, i64)> = {
                let submission = self.inner.submission.lock().unwrap();
                if submission.n_acked == submission.shares.len() {
                    return;
                }
                submission
                    .shares
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !submission.acked[*i])
                    .map(|(i, &share)| (i, share))
                    .collect()
            };

            for (counter, share) in pending {
                let voter = self.clone();
                thread::spawn(move || voter.send_count_vote(counter, share));
            }

            if !interruptible_sleep(&self.inner.killed, self.inner.config.submit_retry) {
                return;
            }
        }
    }

    fn send_count_vote(&self, counter: usize, share: i64) {
        let request = Request::CountVote(CountVoteRequest {
            voter_id: self.inner.voter_id,
            share,
        });
        let reply = self.inner.committee[counter].call(&request);

        if let Some(Reply::CountVote(reply)) = reply {
            if reply.success {
                let mut submission = self.inner.submission.lock().unwrap();
                if !submission.acked[counter] {
                    submission.acked[counter] = true;
                    submission.n_acked += 1;
                }
            }
        }
    }

    /// Whether every counter has acknowledged its share.
    pub fn done(&self) -> bool {
        let submission = self.inner.submission.lock().unwrap();
        submission.n_acked == submission.shares.len()
    }

    pub fn kill(&self) {
        self.inner.killed.store(true, Ordering::SeqCst);
    }

    fn killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }

    pub fn voter_id(&self) -> i64 {
        self.inner.voter_id
    }

    pub fn vote(&self) -> i64 {
        self.inner.vote
    }

    pub fn shares(&self) -> Vec<i64> {
        self.inner.submission.lock().unwrap().shares.clone()
    }
}
