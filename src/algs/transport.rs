//! Group-level collectives over raw byte buffers.
//!
//! [`Transport`] is the seam between mesh bookkeeping and the actual data
//! movement. Roots and slot indices are always *local* ranks within the
//! group. Every call blocks until the local part of the collective is done.
//!
//! [`CommTransport`] implements the trait on top of any point-to-point
//! [`Communicator`] with linear, root-based algorithms. Each step is ordered
//! so the schedule stays deadlock free when sends and receives both block.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{KIND_GROUP_HELLO, WIRE_VERSION, WireAck, WireGroupHello};
use crate::algs::wire::{cast_slice, cast_slice_mut, collect_from_bytes};
use crate::config::MeshConfig;
use crate::mesh_error::MeshError;
use crate::topology::group::GroupHandle;

/// Combines an incoming buffer into an accumulator of the same length.
pub type Combine<'a> = &'a (dyn Fn(&mut [u8], &[u8]) + Sync);

/// Blocking group collectives.
pub trait Transport: Send + Sync {
    /// This process's global rank.
    fn rank(&self) -> usize;
    /// Number of ranks in the world.
    fn world_size(&self) -> usize;

    /// Blocking creation collective among the group's members.
    fn create_group(&self, group: &GroupHandle) -> Result<(), MeshError>;

    /// Overwrite every member's `buf` with the contents held by `root`.
    fn broadcast(
        &self,
        group: &GroupHandle,
        buf: &mut [u8],
        root: usize,
    ) -> Result<(), MeshError>;

    /// `root` holds one payload per member (`send`); member `i` receives
    /// payload `i` into `recv`. `send` is ignored on non-root members.
    fn scatter(
        &self,
        group: &GroupHandle,
        recv: &mut [u8],
        send: Option<&[&[u8]]>,
        root: usize,
    ) -> Result<(), MeshError>;

    /// `output[j]` receives what member `j` put in its `input[me]`.
    fn all_to_all(
        &self,
        group: &GroupHandle,
        output: &mut [&mut [u8]],
        input: &[&[u8]],
    ) -> Result<(), MeshError>;

    /// `output` becomes the concatenation of every member's `input` in local
    /// rank order.
    fn all_gather(
        &self,
        group: &GroupHandle,
        output: &mut [u8],
        input: &[u8],
    ) -> Result<(), MeshError>;

    /// Fold every member's `buf` into `root`'s `buf` with `combine`, in local
    /// rank order. Non-root buffers are left untouched.
    fn reduce(
        &self,
        group: &GroupHandle,
        buf: &mut [u8],
        root: usize,
        combine: Combine<'_>,
    ) -> Result<(), MeshError>;
}

/// [`Transport`] over a point-to-point [`Communicator`].
///
/// The group-creation handshake travels on `tag_base`; group `g` exchanges
/// data on `tag_base + 1 + g`, wrapped in the 15-bit tag space so that it
/// never reuses `tag_base`. Past 32767 groups, data tags repeat.
#[derive(Debug, Clone)]
pub struct CommTransport<C> {
    comm: C,
    tag_base: CommTag,
}

impl<C: Communicator> CommTransport<C> {
    pub fn new(comm: C) -> Self {
        Self::with_tag_base(comm, CommTag(MeshConfig::default().comm_tag_base))
    }

    pub fn with_config(comm: C, config: &MeshConfig) -> Self {
        Self::with_tag_base(comm, CommTag(config.comm_tag_base))
    }

    pub fn with_tag_base(comm: C, tag_base: CommTag) -> Self {
        Self { comm, tag_base }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    fn data_tag(&self, group: &GroupHandle) -> u16 {
        self.tag_base.nth_after(group.id().0).as_u16()
    }

    fn member(&self, group: &GroupHandle) -> Result<usize, MeshError> {
        group.local_rank().ok_or(MeshError::NotInMesh {
            rank: self.comm.rank(),
        })
    }

    fn check_root(group: &GroupHandle, root: usize) -> Result<(), MeshError> {
        if root < group.size() {
            Ok(())
        } else {
            Err(MeshError::DimOutOfRange {
                dim: root,
                ndim: group.size(),
            })
        }
    }

    fn send(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.comm.isend(peer, tag, buf).wait();
    }

    /// Receive exactly `dst.len()` bytes from `peer`. A message of any other
    /// length is an error and leaves `dst` untouched.
    fn recv_into(&self, peer: usize, tag: u16, dst: &mut [u8]) -> Result<(), MeshError> {
        let handle = self.comm.irecv(peer, tag, dst);
        match handle.wait() {
            Some(data) if data.len() == dst.len() => {
                dst.copy_from_slice(&data);
                Ok(())
            }
            Some(data) => {
                log::warn!(
                    "rank {} expected {} bytes from rank {peer}, got {}",
                    self.comm.rank(),
                    dst.len(),
                    data.len()
                );
                Err(MeshError::LengthMismatch {
                    expected: dst.len(),
                    found: data.len(),
                })
            }
            None => Err(MeshError::comm(
                peer,
                format!("failed to receive from rank {peer}"),
            )),
        }
    }

    fn peer(group: &GroupHandle, local: usize) -> usize {
        group.ranks()[local]
    }
}

impl<C: Communicator> Transport for CommTransport<C> {
    fn rank(&self) -> usize {
        self.comm.rank()
    }

    fn world_size(&self) -> usize {
        self.comm.size()
    }

    fn create_group(&self, group: &GroupHandle) -> Result<(), MeshError> {
        let me = self.member(group)?;
        let n = group.size();
        if n == 1 {
            return Ok(());
        }
        let tag = self.tag_base.as_u16();
        let gid = group.id().0;
        let fingerprint = group.fingerprint();

        if me != 0 {
            let hello = WireGroupHello::new(gid, n, me, fingerprint);
            let root = Self::peer(group, 0);
            self.send(root, tag, cast_slice(std::slice::from_ref(&hello)));
            let mut ack = WireAck::new(0, false);
            self.recv_into(root, tag, cast_slice_mut(std::slice::from_mut(&mut ack)))?;
            if !ack.ok() || ack.group() != gid {
                return Err(MeshError::GroupMismatch {
                    group: gid,
                    detail: format!("rejected by root rank {root}"),
                });
            }
            return Ok(());
        }

        let mut problems = Vec::new();
        for local in 1..n {
            let peer = Self::peer(group, local);
            let mut hello = WireGroupHello::new(0, 0, 0, 0);
            self.recv_into(peer, tag, cast_slice_mut(std::slice::from_mut(&mut hello)))?;
            if hello.hdr.version() != WIRE_VERSION || hello.hdr.kind() != KIND_GROUP_HELLO {
                problems.push(format!("rank {peer} sent an unexpected message"));
            } else if hello.group() != gid
                || hello.members() != n
                || hello.local_rank() != local
                || hello.fingerprint() != fingerprint
            {
                problems.push(format!(
                    "rank {peer} is creating group {} ({} members, local rank {})",
                    hello.group(),
                    hello.members(),
                    hello.local_rank()
                ));
            }
        }
        let ok = problems.is_empty();
        let ack = WireAck::new(gid, ok);
        for local in 1..n {
            self.send(
                Self::peer(group, local),
                tag,
                cast_slice(std::slice::from_ref(&ack)),
            );
        }
        if ok {
            Ok(())
        } else {
            let detail = problems.join("; ");
            log::warn!("group {gid} handshake failed: {detail}");
            Err(MeshError::GroupMismatch { group: gid, detail })
        }
    }

    fn broadcast(
        &self,
        group: &GroupHandle,
        buf: &mut [u8],
        root: usize,
    ) -> Result<(), MeshError> {
        let me = self.member(group)?;
        Self::check_root(group, root)?;
        let tag = self.data_tag(group);
        if me == root {
            for local in (0..group.size()).filter(|&l| l != root) {
                self.send(Self::peer(group, local), tag, buf);
            }
            Ok(())
        } else {
            self.recv_into(Self::peer(group, root), tag, buf)
        }
    }

    fn scatter(
        &self,
        group: &GroupHandle,
        recv: &mut [u8],
        send: Option<&[&[u8]]>,
        root: usize,
    ) -> Result<(), MeshError> {
        let me = self.member(group)?;
        Self::check_root(group, root)?;
        let tag = self.data_tag(group);
        if me != root {
            return self.recv_into(Self::peer(group, root), tag, recv);
        }

        let send = send.ok_or(MeshError::MemberCountMismatch {
            expected: group.size(),
            found: 0,
        })?;
        if send.len() != group.size() {
            return Err(MeshError::MemberCountMismatch {
                expected: group.size(),
                found: send.len(),
            });
        }
        if send[root].len() != recv.len() {
            return Err(MeshError::LengthMismatch {
                expected: recv.len(),
                found: send[root].len(),
            });
        }
        for local in (0..group.size()).filter(|&l| l != root) {
            self.send(Self::peer(group, local), tag, send[local]);
        }
        recv.copy_from_slice(send[root]);
        Ok(())
    }

    fn all_to_all(
        &self,
        group: &GroupHandle,
        output: &mut [&mut [u8]],
        input: &[&[u8]],
    ) -> Result<(), MeshError> {
        let me = self.member(group)?;
        let n = group.size();
        for found in [output.len(), input.len()] {
            if found != n {
                return Err(MeshError::MemberCountMismatch { expected: n, found });
            }
        }
        if output[me].len() != input[me].len() {
            return Err(MeshError::LengthMismatch {
                expected: output[me].len(),
                found: input[me].len(),
            });
        }
        output[me].copy_from_slice(input[me]);

        let tag = self.data_tag(group);
        // Pairwise exchange, ascending peer order; the lower rank of each pair
        // sends first.
        for local in (0..n).filter(|&l| l != me) {
            let peer = Self::peer(group, local);
            if me < local {
                self.send(peer, tag, input[local]);
                self.recv_into(peer, tag, output[local])?;
            } else {
                self.recv_into(peer, tag, output[local])?;
                self.send(peer, tag, input[local]);
            }
        }
        Ok(())
    }

    fn all_gather(
        &self,
        group: &GroupHandle,
        output: &mut [u8],
        input: &[u8],
    ) -> Result<(), MeshError> {
        let me = self.member(group)?;
        let n = group.size();
        let len = input.len();
        if output.len() != n * len {
            return Err(MeshError::LengthMismatch {
                expected: n * len,
                found: output.len(),
            });
        }
        let tag = self.data_tag(group);
        if me == 0 {
            output[..len].copy_from_slice(input);
            for local in 1..n {
                let slot = &mut output[local * len..(local + 1) * len];
                self.recv_into(Self::peer(group, local), tag, slot)?;
            }
        } else {
            self.send(Self::peer(group, 0), tag, input);
        }
        self.broadcast(group, output, 0)
    }

    fn reduce(
        &self,
        group: &GroupHandle,
        buf: &mut [u8],
        root: usize,
        combine: Combine<'_>,
    ) -> Result<(), MeshError> {
        let me = self.member(group)?;
        Self::check_root(group, root)?;
        let tag = self.data_tag(group);
        if me != root {
            self.send(Self::peer(group, root), tag, buf);
            return Ok(());
        }
        let mut incoming = vec![0u8; buf.len()];
        for local in (0..group.size()).filter(|&l| l != root) {
            self.recv_into(Self::peer(group, local), tag, &mut incoming)?;
            combine(buf, &incoming);
        }
        Ok(())
    }
}

/// Element-wise `u64` sum, handy for tests of the raw transport.
pub fn sum_u64(acc: &mut [u8], incoming: &[u8]) {
    let mut a: Vec<u64> = collect_from_bytes(acc);
    let b: Vec<u64> = collect_from_bytes(incoming);
    for (x, y) in a.iter_mut().zip(&b) {
        *x += *y;
    }
    acc.copy_from_slice(cast_slice(&a));
}
