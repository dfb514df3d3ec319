use crate::*;
use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Submit one Shamir share to a counter. `voter_id` is the idempotency key:
/// a counter accepts the same (id, share) pair any number of times.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CountVoteRequest {
    pub voter_id: i64,
    pub share: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CountVoteReply {
    pub success: bool,
}

/// Push one counter's partial sum to a peer. `index` is the sender's
/// 1-based committee index, used directly as a Lagrange x-coordinate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CountTotalRequest {
    pub index: i64,
    pub value: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CountTotalReply {
    pub success: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Request {
    CountVote(CountVoteRequest),
    CountTotal(CountTotalRequest),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    CountVote(CountVoteReply),
    CountTotal(CountTotalReply),
}

impl Request {
    pub fn pack(&self) -> Vec<u8> {
        serde_cbor::to_vec(self).expect("cryptotally: unable to serialize request")
    }

    pub fn unpack(packed: &[u8]) -> Result<Self, Error> {
        Ok(serde_cbor::from_slice(packed)?)
    }
}

impl Reply {
    pub fn pack(&self) -> Vec<u8> {
        serde_cbor::to_vec(self).expect("cryptotally: unable to serialize reply")
    }

    pub fn unpack(packed: &[u8]) -> Result<Self, Error> {
        Ok(serde_cbor::from_slice(packed)?)
    }
}

/// Server-side RPC dispatch. Implemented by the vote counter.
pub trait Service: Send + Sync {
    fn dispatch(&self, request: Request) -> Reply;
}

struct EndPoint {
    enabled: bool,
    server: Option<usize>,
}

struct NetState {
    reliable: bool,
    ends: HashMap<String, EndPoint>,
    servers: HashMap<usize, Arc<dyn Service>>,
}

/// An in-process network that delivers requests best-effort.
///
/// Client ends are created by name, bound to a numbered server, and can be
/// enabled or disabled at any time. In unreliable mode a call may be delayed,
/// dropped before delivery, or have its reply dropped after the server has
/// already processed the request. Handlers therefore see duplicates whenever
/// the caller retries, and every handler must be safe under that.
#[derive(Clone)]
pub struct Network {
    state: Arc<Mutex<NetState>>,
}

impl Default for Network {
    fn default() -> Self {
        Network::new()
    }
}

impl Network {
    pub fn new() -> Network {
        Network {
            state: Arc::new(Mutex::new(NetState {
                reliable: true,
                ends: HashMap::new(),
                servers: HashMap::new(),
            })),
        }
    }

    pub fn set_reliable(&self, reliable: bool) {
        self.state.lock().unwrap().reliable = reliable;
    }

    /// Create a named client end. Ends start disabled and unbound.
    pub fn make_end(&self, name: &str) -> ClientEnd {
        let mut state = self.state.lock().unwrap();
        state.ends.insert(
            name.to_owned(),
            EndPoint {
                enabled: false,
                server: None,
            },
        );
        ClientEnd {
            name: name.to_owned(),
            state: self.state.clone(),
        }
    }

    /// Bind an end to a server number.
    pub fn connect(&self, name: &str, server: usize) {
        let mut state = self.state.lock().unwrap();
        if let Some(end) = state.ends.get_mut(name) {
            end.server = Some(server);
        }
    }

    pub fn enable(&self, name: &str, enabled: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(end) = state.ends.get_mut(name) {
            end.enabled = enabled;
        }
    }

    /// Install (or replace, after a restart) the service behind a server
    /// number.
    pub fn add_server(&self, server: usize, service: Arc<dyn Service>) {
        self.state.lock().unwrap().servers.insert(server, service);
    }

    /// Simulate a server crash: calls routed to it are lost from now on.
    pub fn remove_server(&self, server: usize) {
        self.state.lock().unwrap().servers.remove(&server);
    }
}

/// One named client endpoint bound to a server on the network.
#[derive(Clone)]
pub struct ClientEnd {
    name: String,
    state: Arc<Mutex<NetState>>,
}

impl ClientEnd {
    /// Deliver a request and wait for its reply.
    ///
    /// Returns None when the network lost the request or the reply; the
    /// caller cannot tell which, so it must retry with idempotent requests.
    pub fn call(&self, request: &Request) -> Option<Reply> {
        let wire = request.pack();

        let (reliable, service) = {
            let state = self.state.lock().unwrap();
            let end = state.ends.get(&self.name)?;
            let service = if end.enabled {
                end.server.and_then(|id| state.servers.get(&id).cloned())
            } else {
                None
            };
            (state.reliable, service)
        };

        let service = match service {
            Some(service) => service,
            None => {
                // Dead or disconnected target: the caller waits out a
                // simulated timeout and learns nothing.
                thread::sleep(Duration::from_millis(thread_rng().gen_range(0..100)));
                return None;
            }
        };

        if !reliable {
            thread::sleep(Duration::from_millis(thread_rng().gen_range(0..27)));
            if thread_rng().gen_ratio(1, 10) {
                return None; // request lost in transit
            }
        }

        let request = Request::unpack(&wire).ok()?;
        let reply = service.dispatch(request);
        let reply = Reply::unpack(&reply.pack()).ok()?;

        if !reliable && thread_rng().gen_ratio(1, 10) {
            return None; // reply lost after the server processed the request
        }

        Some(reply)
    }
}
