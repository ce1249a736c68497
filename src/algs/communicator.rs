//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). Messages
//! sent from one rank to another on the same tag arrive in send order.
//! Handles are **waitable**; the group transport calls `.wait()` before it
//! trusts that a buffer is ready.
//!
//! Backends may complete a send or receive eagerly (MPI does), so callers
//! must order their posts as if both were blocking.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Point-to-point tag. Kept to 15 bits so it is valid under every MPI
/// implementation's `MPI_TAG_UB`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u16);

impl CommTag {
    const MASK: u64 = 0x7FFF;

    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    /// The tag itself.
    pub const fn base(self) -> u16 {
        self.0
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// `self + by`, wrapped into the 15-bit tag space.
    pub fn offset(self, by: u64) -> Self {
        Self(((self.0 as u64).wrapping_add(by) & Self::MASK) as u16)
    }

    /// The `index`-th tag after `self`, cycling through the 15-bit space but
    /// never landing on `self`.
    pub fn nth_after(self, index: u64) -> Self {
        self.offset(1 + index % Self::MASK)
    }
}

/// Non-blocking point-to-point communication interface.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// This process's global rank.
    fn rank(&self) -> usize;
    /// Number of ranks in the world.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive sized for `buf`. The whole payload is returned by
    /// [`Wait::wait`], whatever its length; callers check it against `buf`.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// True for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for a single-rank world.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: N ranks inside one process ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Default)]
struct Mailbox {
    queues: Mutex<HashMap<Key, VecDeque<Bytes>>>,
    arrived: Condvar,
}

/// One rank of an in-process universe. Every rank of the universe shares a
/// mailbox; ranks are normally driven from separate threads.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl LocalComm {
    /// Build `size` connected ranks whose receives block until data arrives.
    pub fn universe(size: usize) -> Vec<LocalComm> {
        Self::universe_with_timeout(size, None)
    }

    /// Like [`LocalComm::universe`], but receives give up after `timeout`
    /// and yield no data.
    pub fn universe_with_timeout(size: usize, timeout: Option<Duration>) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                timeout,
            })
            .collect()
    }
}

/// Pending receive on a [`LocalComm`].
pub struct LocalRecv {
    mailbox: Arc<Mailbox>,
    key: Key,
    timeout: Option<Duration>,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut queues = self.mailbox.queues.lock();
        loop {
            if let Some(bytes) = queues.get_mut(&self.key).and_then(VecDeque::pop_front) {
                return Some(bytes.to_vec());
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .mailbox
                        .arrived
                        .wait_until(&mut queues, deadline)
                        .timed_out()
                    {
                        return queues
                            .get_mut(&self.key)
                            .and_then(VecDeque::pop_front)
                            .map(|bytes| bytes.to_vec());
                    }
                }
                None => self.mailbox.arrived.wait(&mut queues),
            }
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.mailbox
            .queues
            .lock()
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        self.mailbox.arrived.notify_all();
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> LocalRecv {
        LocalRecv {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            timeout: self.timeout,
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::mesh_error::MeshError;
    use mpi::Threading;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI world communicator. Sends and receives complete eagerly.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        // Finalizes MPI on drop; must outlive `world`.
        _universe: Universe,
    }

    // SAFETY: MPI is initialized with `Threading::Multiple`, so the world
    // communicator may be used from any thread.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Result<Self, MeshError> {
            let (universe, threading) = mpi::initialize_with_threading(Threading::Multiple)
                .ok_or_else(|| MeshError::comm(0, "MPI was already initialized"))?;
            if threading != Threading::Multiple {
                return Err(MeshError::comm(
                    0,
                    format!("MPI provides {threading:?} threading, need Multiple"),
                ));
            }
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// A receive that already completed.
    pub struct MpiRecv(Option<Vec<u8>>);

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecv {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            MpiRecv(Some(data))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
