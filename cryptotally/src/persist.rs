use crate::*;
use std::sync::{Arc, Mutex};

/// Storage port for a voter's durable state.
///
/// `write_state` must atomically replace the stored blob and survive a
/// process crash; `read_state` returns whatever was last written. The blob
/// is opaque to the port.
pub trait Persister: Send + Sync {
    fn read_state(&self) -> Option<Vec<u8>>;
    fn write_state(&self, data: Vec<u8>);
}

/// An in-memory persister.
///
/// Cloning hands the same backing blob to another instance, which is how a
/// harness simulates a voter restart: kill the old voter, construct a new
/// one with a clone of its persister.
#[derive(Default, Clone)]
pub struct MemPersister {
    state: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemPersister {
    pub fn new() -> MemPersister {
        Default::default()
    }
}

impl Persister for MemPersister {
    fn read_state(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().clone()
    }

    fn write_state(&self, data: Vec<u8>) {
        *self.state.lock().unwrap() = Some(data);
    }
}

/// The voter's durable record.
///
/// Once written, the record never changes: a restarted voter must re-emit
/// exactly the shares it emitted before the crash, under the same id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoterRecord {
    pub voter_id: i64,
    pub vote: i64,
    pub shares: Vec<i64>,
}

impl VoterRecord {
    pub fn pack(&self) -> Vec<u8> {
        serde_cbor::to_vec(self).expect("cryptotally: unable to serialize voter record")
    }

    pub fn unpack(packed: &[u8]) -> Result<Self, Error> {
        Ok(serde_cbor::from_slice(packed)?)
    }
}
