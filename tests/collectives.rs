mod util;
use device_mesh::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use util::*;

#[test]
fn broadcast_roots_at_local_rank_zero() {
    let out = on_ranks(4, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let mut t = tagged(ctx.rank(), &[3]);
        mesh_broadcast(ctx, &mut t, &mesh, "tp")?;
        Ok(t)
    });
    // tp groups are [0, 1] and [2, 3]; their roots are ranks 0 and 2.
    assert_eq!(out[1], tagged(0, &[3]));
    assert_eq!(out[3], tagged(2, &[3]));
    assert_eq!(out[2], tagged(2, &[3]));
}

#[test]
fn scatter_along_each_dim_of_a_cube() {
    for dim in 0..3 {
        let out = on_ranks(8, |ctx| {
            let mesh = ctx.init_mesh("cpu", &[2, 2, 2], None)?;
            let group = mesh.group(dim)?;
            let send: Vec<Tensor<i64>> = group
                .ranks()
                .iter()
                .map(|&r| Tensor::full(&[2, 2], r as i64))
                .collect();
            let mut recv = Tensor::<i64>::zeros(&[2, 2]);
            let root_only = (group.local_rank() == Some(0)).then_some(send.as_slice());
            mesh_scatter(ctx, &mut recv, root_only, &mesh, dim)?;
            Ok(recv)
        });
        for (rank, recv) in out.into_iter().enumerate() {
            assert_eq!(recv, Tensor::full(&[2, 2], rank as i64), "dim {dim}");
        }
    }
}

#[test]
fn scatter_validates_payload_count() {
    let errs = errors_on_ranks(1, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[1], None)?;
        let mut recv = Tensor::<u8>::zeros(&[1]);
        let send = vec![Tensor::<u8>::zeros(&[1]); 2];
        mesh_scatter(ctx, &mut recv, Some(send.as_slice()), &mesh, 0)
    });
    assert!(matches!(
        errs[0],
        MeshError::MemberCountMismatch { expected: 1, found: 2 }
    ));
}

#[test]
fn broadcast_size_disagreement_is_an_error() {
    let results = run_local(2, &test_config(), |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2], None)?;
        let len = if ctx.rank() == 0 { 4 } else { 2 };
        let mut t = Tensor::<i32>::full(&[len], 7 * (ctx.rank() == 0) as i32);
        mesh_broadcast(ctx, &mut t, &mesh, 0)?;
        Ok(t)
    });
    assert!(results[0].is_ok());
    match &results[1] {
        Err(e @ MeshError::LengthMismatch { expected: 8, found: 16 }) => {
            assert_eq!(e.kind(), ErrorKind::Data)
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn all_to_all_transposes() {
    for (shape, dim) in [(vec![4usize], 0usize), (vec![2, 2, 2], 1)] {
        let world: usize = shape.iter().product();
        let out = on_ranks(world, |ctx| {
            let mesh = ctx.init_mesh("cpu", &shape, None)?;
            let group = mesh.group(dim)?.clone();
            let me = ctx.rank();
            // Chunk for member j carries (me, j) and has 1 + j entries.
            let input: Vec<Tensor<i64>> = (0..group.size())
                .map(|j| Tensor::full(&[1 + j], (me * 100 + group.ranks()[j]) as i64))
                .collect();
            let mine = group.local_rank().unwrap_or(0);
            let mut output: Vec<Tensor<i64>> = (0..group.size())
                .map(|_| Tensor::zeros(&[1 + mine]))
                .collect();
            mesh_all_to_all(ctx, &mut output, &input, &mesh, dim)?;
            Ok((group, output))
        });
        for (me, (group, output)) in out.iter().enumerate() {
            for (j, chunk) in output.iter().enumerate() {
                let peer = group.ranks()[j];
                assert_eq!(chunk.as_slice()[0], (peer * 100 + me) as i64);
            }
        }
    }
}

#[test]
fn uneven_scatter_with_padding_over_eight_ranks() {
    let original = Tensor::from_fn(&[11, 3], |i| i as f32 * 0.25);
    let out = on_ranks(8, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[8], None)?;
        let shard = Shard::new(0);
        let (chunks, pads) = shard.split_tensor(&original, 8, true)?;
        let mut recv = Tensor::zeros(chunks[0].shape());
        let root = (ctx.rank() == 0).then_some(chunks.as_slice());
        mesh_scatter(ctx, &mut recv, root, &mesh, 0)?;
        let mine = shard.unpad_tensor(&recv, pads[ctx.rank()])?;
        let whole = mesh_all_gather_padded(ctx, &recv, &pads, &mesh, 0, 0)?;
        Ok((mine, whole))
    });
    let sizes: Vec<usize> = out.iter().map(|(m, _)| m.shape()[0]).collect();
    assert_eq!(sizes, Shard::chunk_sizes(11, 8));
    let pieces: Vec<Tensor<f32>> = out.iter().map(|(m, _)| m.clone()).collect();
    assert_eq!(Tensor::cat(&pieces, 0).unwrap(), original);
    assert!(out.iter().all(|(_, whole)| *whole == original));
}

#[test]
fn reduce_scatter_uneven() {
    let out = on_ranks(8, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[8], None)?;
        let t = Tensor::from_fn(&[3, 11], |i| (i + ctx.rank()) as i64);
        mesh_reduce_scatter(ctx, &t, ReduceOp::Sum, &mesh, 0, 1)
    });
    let expected = Tensor::from_fn(&[3, 11], |i| (8 * i + 28) as i64);
    let sizes: Vec<usize> = out.iter().map(|t| t.shape()[1]).collect();
    assert_eq!(sizes, Shard::chunk_sizes(11, 8));
    assert_eq!(Tensor::cat(&out, 1).unwrap(), expected);
}

#[test]
fn reduce_scatter_along_one_mesh_dim() {
    let out = on_ranks(4, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let t = Tensor::full(&[4], ctx.rank() as u64 + 1);
        mesh_reduce_scatter(ctx, &t, ReduceOp::Max, &mesh, "dp", 0)
    });
    // dp groups are [0, 2] and [1, 3].
    assert_eq!(out[0].as_slice(), &[3, 3]);
    assert_eq!(out[2].as_slice(), &[3, 3]);
    assert_eq!(out[1].as_slice(), &[4, 4]);
    assert_eq!(out[3].as_slice(), &[4, 4]);
}

#[test]
fn all_reduce_and_all_gather_random_payloads() {
    let payloads: Vec<Vec<i32>> = (0..6)
        .map(|seed| {
            let mut rng = SmallRng::seed_from_u64(seed);
            (0..5).map(|_| rng.gen_range(-50..50)).collect()
        })
        .collect();
    let out = on_ranks(6, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[3, 2], Some(&["a", "b"]))?;
        let mine = Tensor::new(vec![5], payloads[ctx.rank()].clone())?;
        let mut summed = mine.clone();
        mesh_all_reduce(ctx, &mut summed, ReduceOp::Sum, &mesh, "a")?;
        let gathered = mesh_all_gather(ctx, &mine, &mesh, "a", 0)?;
        Ok((summed, gathered, mesh.group("a")?.ranks().to_vec()))
    });
    for (summed, gathered, members) in out {
        let expect_sum: Vec<i32> = (0..5)
            .map(|i| members.iter().map(|&r| payloads[r][i]).sum())
            .collect();
        assert_eq!(summed.as_slice(), expect_sum.as_slice());
        let expect_cat: Vec<i32> = members
            .iter()
            .flat_map(|&r| payloads[r].iter().copied())
            .collect();
        assert_eq!(gathered.as_slice(), expect_cat.as_slice());
    }
}

#[test]
fn byte_all_reduce_wraps_instead_of_panicking() {
    let out = on_ranks(8, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[8], None)?;
        let mut t = Tensor::<u8>::full(&[2], 200);
        mesh_all_reduce(ctx, &mut t, ReduceOp::Sum, &mesh, 0)?;
        Ok(t)
    });
    let expected = (200u32 * 8 % 256) as u8;
    assert!(out.iter().all(|t| t.as_slice() == [expected, expected]));
}
