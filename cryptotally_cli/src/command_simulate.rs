use cryptotally::{
    Config, MemPersister, Network, Persister, VoteCounter, Voter, NO_WINNER,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub fn command_simulate(matches: &clap::ArgMatches) {
    let votes = parse_votes(matches.value_of("VOTES").unwrap());
    let n_counters: usize = parse_count(matches, "counters");
    let threshold: usize = parse_count(matches, "threshold");
    let unreliable = matches.is_present("unreliable");

    let config = Config::from_env();
    let net = Network::new();
    net.set_reliable(!unreliable);

    // The committee, fully meshed.
    let mut counters = Vec::with_capacity(n_counters);
    for me in 0..n_counters {
        let ends = (0..n_counters)
            .map(|j| {
                let name = format!("counter-{}-to-{}", me, j);
                let end = net.make_end(&name);
                net.connect(&name, j);
                net.enable(&name, true);
                end
            })
            .collect();

        let counter = match VoteCounter::new(ends, me, votes.len(), threshold, config.clone()) {
            Ok(counter) => counter,
            Err(e) => {
                eprintln!("cryptotally simulate: {}", e);
                std::process::exit(1);
            }
        };
        net.add_server(me, Arc::new(counter.clone()));
        counters.push(counter);
    }

    // The voters, each with its own persistence handle.
    let mut voters = Vec::with_capacity(votes.len());
    for (i, &vote) in votes.iter().enumerate() {
        let ends = (0..n_counters)
            .map(|j| {
                let name = format!("voter-{}-to-{}", i, j);
                let end = net.make_end(&name);
                net.connect(&name, j);
                net.enable(&name, true);
                end
            })
            .collect();

        let persister: Arc<dyn Persister> = Arc::new(MemPersister::new());
        let voter = match Voter::new(ends, vote, threshold, persister, config.clone()) {
            Ok(voter) => voter,
            Err(e) => {
                eprintln!("cryptotally simulate: {}", e);
                std::process::exit(1);
            }
        };
        voter.start();
        voters.push(voter);
    }

    println!(
        "simulating: {} voters, {} counters, threshold {}, {} network",
        votes.len(),
        n_counters,
        threshold,
        if unreliable { "unreliable" } else { "reliable" }
    );

    let winner = poll_for_winner(&counters);

    for voter in &voters {
        voter.kill();
    }
    for counter in &counters {
        counter.kill();
    }

    match winner {
        Some(winner) => println!("winner: {}", winner),
        None => {
            eprintln!("cryptotally simulate: the committee failed to decide");
            std::process::exit(1);
        }
    }
}

fn poll_for_winner(counters: &[VoteCounter]) -> Option<i64> {
    for _ in 0..20 {
        thread::sleep(Duration::from_millis(500));

        for counter in counters {
            let (done, winner) = counter.done();
            if done && winner != NO_WINNER {
                return Some(winner);
            }
        }
    }
    None
}

fn parse_votes(input: &str) -> Vec<i64> {
    input
        .split(',')
        .map(|vote| match vote.trim() {
            "0" => 0,
            "1" => 1,
            other => {
                eprintln!("cryptotally simulate: votes must be 0 or 1, got {:?}", other);
                std::process::exit(1);
            }
        })
        .collect()
}

fn parse_count(matches: &clap::ArgMatches, name: &str) -> usize {
    let val = matches.value_of(name).unwrap();
    match val.parse() {
        Ok(count) => count,
        Err(_) => {
            eprintln!("cryptotally simulate: --{} must be an integer", name);
            std::process::exit(1);
        }
    }
}
