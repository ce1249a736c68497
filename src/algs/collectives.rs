//! Tensor collectives along one mesh dimension.
//!
//! Each call resolves `(mesh, dim)` to the mesh's cached group for that
//! dimension and runs on the context's transport. The root is always local
//! rank 0 of the resolved group, never global rank 0. Every member of the
//! group must make the same call.
//!
//! Uneven axes go through [`Shard`]: pad every chunk to `ceil(extent / n)`,
//! move the equal-sized chunks, strip each member's pad afterwards.

use crate::algs::transport::Transport;
use crate::algs::wire::{cast_slice, cast_slice_mut, collect_from_bytes};
use crate::data::shard::Shard;
use crate::data::tensor::{Element, ReduceOp, Tensor};
use crate::mesh_error::MeshError;
use crate::topology::context::MeshContext;
use crate::topology::group::GroupHandle;
use crate::topology::mesh::{Mesh, MeshDim};

const ROOT: usize = 0;

fn member(group: &GroupHandle, mesh: &Mesh) -> Result<usize, MeshError> {
    group
        .local_rank()
        .ok_or(MeshError::NotInMesh { rank: mesh.rank() })
}

/// Overwrite `tensor` on every member with the root's contents.
pub fn mesh_broadcast<'a, T, E>(
    ctx: &MeshContext<T>,
    tensor: &mut Tensor<E>,
    mesh: &Mesh,
    dim: impl Into<MeshDim<'a>>,
) -> Result<(), MeshError>
where
    T: Transport,
    E: Element,
{
    let group = mesh.group(dim)?;
    ctx.transport().broadcast(group, tensor.as_bytes_mut(), ROOT)
}

/// The root hands `send[i]` to member `i`, which receives it into `recv`.
/// `send` is only read on the root; every entry must match `recv` in size.
pub fn mesh_scatter<'a, T, E>(
    ctx: &MeshContext<T>,
    recv: &mut Tensor<E>,
    send: Option<&[Tensor<E>]>,
    mesh: &Mesh,
    dim: impl Into<MeshDim<'a>>,
) -> Result<(), MeshError>
where
    T: Transport,
    E: Element,
{
    let group = mesh.group(dim)?;
    if member(group, mesh)? != ROOT {
        return ctx.transport().scatter(group, recv.as_bytes_mut(), None, ROOT);
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
    if let Some(bad) = send.iter().find(|t| t.numel() != recv.numel()) {
        return Err(MeshError::LengthMismatch {
            expected: recv.numel(),
            found: bad.numel(),
        });
    }
    if group.size() == 1 {
        recv.as_mut_slice().copy_from_slice(send[0].as_slice());
        return Ok(());
    }
    // Contiguous staging copies of every payload.
    let staged: Vec<Vec<u8>> = send.iter().map(|t| t.as_bytes().to_vec()).collect();
    let views: Vec<&[u8]> = staged.iter().map(Vec::as_slice).collect();
    ctx.transport()
        .scatter(group, recv.as_bytes_mut(), Some(views.as_slice()), ROOT)
}

/// `output[j]` receives the tensor member `j` placed in its `input[me]`.
/// `output` must be pre-shaped to the expected incoming sizes.
pub fn mesh_all_to_all<'a, T, E>(
    ctx: &MeshContext<T>,
    output: &mut [Tensor<E>],
    input: &[Tensor<E>],
    mesh: &Mesh,
    dim: impl Into<MeshDim<'a>>,
) -> Result<(), MeshError>
where
    T: Transport,
    E: Element,
{
    let group = mesh.group(dim)?;
    let mut outs: Vec<&mut [u8]> = output.iter_mut().map(Tensor::as_bytes_mut).collect();
    let ins: Vec<&[u8]> = input.iter().map(Tensor::as_bytes).collect();
    ctx.transport().all_to_all(group, &mut outs, &ins)
}

/// Every member's `tensor`, in local rank order. All members must pass
/// tensors of the same shape.
fn gather_pieces<T, E>(
    ctx: &MeshContext<T>,
    tensor: &Tensor<E>,
    group: &GroupHandle,
) -> Result<Vec<Tensor<E>>, MeshError>
where
    T: Transport,
    E: Element,
{
    let n = group.size();
    let len = tensor.numel();
    let mut out = Tensor::<E>::zeros(&[n * len]).into_vec();
    ctx.transport()
        .all_gather(group, cast_slice_mut(&mut out), tensor.as_bytes())?;
    (0..n)
        .map(|i| Tensor::new(tensor.shape().to_vec(), out[i * len..(i + 1) * len].to_vec()))
        .collect()
}

/// Concatenate every member's `tensor` along `gather_dim`.
pub fn mesh_all_gather<'a, T, E>(
    ctx: &MeshContext<T>,
    tensor: &Tensor<E>,
    mesh: &Mesh,
    dim: impl Into<MeshDim<'a>>,
    gather_dim: usize,
) -> Result<Tensor<E>, MeshError>
where
    T: Transport,
    E: Element,
{
    let group = mesh.group(dim)?;
    let pieces = gather_pieces(ctx, tensor, group)?;
    Tensor::cat(&pieces, gather_dim)
}

/// Gather padded shards, strip member `i`'s `pad_sizes[i]` entries along
/// `gather_dim`, and concatenate. Inverts [`Shard::split_tensor`] with
/// padding.
pub fn mesh_all_gather_padded<'a, T, E>(
    ctx: &MeshContext<T>,
    padded: &Tensor<E>,
    pad_sizes: &[usize],
    mesh: &Mesh,
    dim: impl Into<MeshDim<'a>>,
    gather_dim: usize,
) -> Result<Tensor<E>, MeshError>
where
    T: Transport,
    E: Element,
{
    let group = mesh.group(dim)?;
    if pad_sizes.len() != group.size() {
        return Err(MeshError::MemberCountMismatch {
            expected: group.size(),
            found: pad_sizes.len(),
        });
    }
    let shard = Shard::new(gather_dim);
    let pieces = gather_pieces(ctx, padded, group)?
        .iter()
        .zip(pad_sizes)
        .map(|(p, &pad)| shard.unpad_tensor(p, pad))
        .collect::<Result<Vec<_>, _>>()?;
    Tensor::cat(&pieces, gather_dim)
}

fn reduce_to_root<T, E>(
    ctx: &MeshContext<T>,
    tensor: &mut Tensor<E>,
    op: ReduceOp,
    group: &GroupHandle,
) -> Result<(), MeshError>
where
    T: Transport,
    E: Element,
{
    let combine = move |acc: &mut [u8], incoming: &[u8]| {
        let mut a: Vec<E> = collect_from_bytes(acc);
        let b: Vec<E> = collect_from_bytes(incoming);
        op.apply(&mut a, &b);
        acc.copy_from_slice(cast_slice(&a));
    };
    ctx.transport()
        .reduce(group, tensor.as_bytes_mut(), ROOT, &combine)
}

/// Combine `tensor` element-wise across the group with `op`, then hand
/// member `i` the `i`-th chunk along `scatter_dim`. Uneven extents are padded
/// internally; the returned chunk is unpadded, so chunk sizes follow
/// [`Shard::chunk_sizes`].
pub fn mesh_reduce_scatter<'a, T, E>(
    ctx: &MeshContext<T>,
    tensor: &Tensor<E>,
    op: ReduceOp,
    mesh: &Mesh,
    dim: impl Into<MeshDim<'a>>,
    scatter_dim: usize,
) -> Result<Tensor<E>, MeshError>
where
    T: Transport,
    E: Element,
{
    let group = mesh.group(dim)?;
    let me = member(group, mesh)?;
    let n = group.size();
    let shard = Shard::new(scatter_dim);

    let (chunks, pads) = shard.split_tensor(tensor, n, true)?;
    let mut recv = Tensor::zeros(chunks[me].shape());
    let mut reduced = Tensor::cat(&chunks, scatter_dim)?;
    reduce_to_root(ctx, &mut reduced, op, group)?;

    let staged = if me == ROOT {
        Some(shard.split_tensor(&reduced, n, false)?.0)
    } else {
        None
    };
    let views: Option<Vec<&[u8]>> = staged
        .as_ref()
        .map(|parts| parts.iter().map(Tensor::as_bytes).collect());
    ctx.transport()
        .scatter(group, recv.as_bytes_mut(), views.as_deref(), ROOT)?;
    shard.unpad_tensor(&recv, pads[me])
}

/// Combine `tensor` element-wise across the group with `op`; every member
/// ends up with the result.
pub fn mesh_all_reduce<'a, T, E>(
    ctx: &MeshContext<T>,
    tensor: &mut Tensor<E>,
    op: ReduceOp,
    mesh: &Mesh,
    dim: impl Into<MeshDim<'a>>,
) -> Result<(), MeshError>
where
    T: Transport,
    E: Element,
{
    let group = mesh.group(dim)?;
    reduce_to_root(ctx, tensor, op, group)?;
    ctx.transport().broadcast(group, tensor.as_bytes_mut(), ROOT)
}
