mod util;
use device_mesh::prelude::*;
use device_mesh::topology::{GroupId, simulate_plans, verify_plans};
use util::*;

#[test]
fn groups_partition_every_dimension() {
    let shape = [2, 3, 2];
    let per_rank = on_ranks(12, |ctx| {
        let mesh = ctx.init_mesh("cpu", &shape, None)?;
        Ok(mesh
            .groups()
            .iter()
            .map(|g| g.ranks().to_vec())
            .collect::<Vec<_>>())
    });
    for (dim, &len) in shape.iter().enumerate() {
        let mut seen: Vec<Vec<usize>> = per_rank.iter().map(|g| g[dim].clone()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 12 / len);
        let mut all: Vec<usize> = seen.iter().flatten().copied().collect();
        assert!(seen.iter().all(|s| s.len() == len));
        all.sort();
        assert_eq!(all, (0..12).collect::<Vec<_>>());
    }
}

#[test]
fn every_rank_registers_the_same_groups() {
    let reversed = MeshLayout::new(vec![2, 4], vec![7, 6, 5, 4, 3, 2, 1, 0]).unwrap();
    let partial = MeshLayout::new(vec![2, 2], vec![1, 3, 5, 7]).unwrap();
    let layouts = [reversed, partial];
    // [5, 7] is a tp group of the partial mesh, created ahead of it.
    let plans = simulate_plans(8, "", &[vec![5, 7]], &layouts).unwrap();
    assert_eq!(plans.len(), 8);
    verify_plans(&plans, &layouts).unwrap();

    // world, [5, 7], six reversed subsets, three new partial subsets
    assert_eq!(plans[0].registrations.len(), 11);
    assert!(plans.iter().all(|p| p.registrations == plans[0].registrations));

    assert!(plans[0].mesh_groups[1].is_empty());
    let rank5: Vec<&[usize]> = plans[5].mesh_groups[1].iter().map(|g| g.ranks()).collect();
    assert_eq!(rank5, vec![&[1, 5][..], &[5, 7][..]]);
    assert_eq!(plans[5].mesh_groups[1][1].id(), GroupId(1));
    // The reused [5, 7] is created once.
    assert_eq!(plans[5].created.len(), 5);
    assert_eq!(plans[0].created.len(), 3);
}

#[test]
fn diverging_registration_is_detected() {
    let layouts = [MeshLayout::from_shape(&[2, 2]).unwrap()];
    let mut plans = simulate_plans(4, "", &[], &layouts).unwrap();
    plans[2].registrations.swap(1, 2);
    assert!(matches!(
        verify_plans(&plans, &layouts),
        Err(MeshError::GroupMismatch { .. })
    ));

    let mut plans = simulate_plans(4, "", &[], &layouts).unwrap();
    plans[3].mesh_groups[0].reverse();
    assert!(verify_plans(&plans, &layouts).is_err());
}

#[test]
fn independent_meshes_differ_by_identity_only() {
    let out = on_ranks(4, |ctx| {
        let a = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let b = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let c = ctx.init_mesh("cpu", &[4], None)?;
        Ok((a == b, a.id() != b.id(), a == c))
    });
    for (equal, distinct_ids, equal_to_other) in out {
        assert!(equal);
        assert!(distinct_ids);
        assert!(!equal_to_other);
    }
}

#[test]
fn two_by_two_creates_three_groups() {
    let out = on_ranks(4, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let _again = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let tag = ctx.config().default_tag.clone();
        Ok((
            ctx.registry().creations(),
            ctx.registry().member_groups(&tag).len(),
            mesh.group("tp")?.ranks().to_vec(),
        ))
    });
    for (rank, (creations, members, tp)) in out.into_iter().enumerate() {
        assert_eq!(creations, 3);
        assert_eq!(members, 3);
        assert_eq!(tp, vec![2 * (rank / 2), 2 * (rank / 2) + 1]);
    }
}

#[test]
fn pre_created_groups_are_reused() {
    let out = on_ranks(4, |ctx| {
        let pair = ctx.new_group(&[0, 1])?;
        let other = ctx.new_group(&[2, 3])?;
        let before = ctx.registry().creations();
        let mesh = ctx.init_mesh("cpu", &[2, 2], None)?;
        let tp = mesh.group(1)?.clone();
        let reused = if ctx.rank() < 2 { tp == pair } else { tp == other };
        Ok((reused, ctx.registry().creations() - before))
    });
    for (reused, fresh) in out {
        assert!(reused);
        // Only the dim-0 group is new.
        assert_eq!(fresh, 1);
    }
}

#[test]
fn one_dim_world_mesh_uses_world_group() {
    let out = on_ranks(3, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[3], None)?;
        Ok((mesh.group(0)? == ctx.world_group(), ctx.registry().creations()))
    });
    assert!(out.iter().all(|&(same, creations)| same && creations == 1));
}

#[test]
fn bad_names_fail_before_any_group() {
    let out = on_ranks(2, |ctx| {
        let before = ctx.registry().len();
        let mismatch = ctx.init_mesh("cpu", &[2], Some(&["a", "b"])).unwrap_err();
        let dup = ctx
            .init_mesh("cpu", &[1, 2], Some(&["dp", "dp"]))
            .unwrap_err();
        Ok((mismatch, dup, ctx.registry().len() - before))
    });
    for (mismatch, dup, registered) in out {
        assert!(matches!(mismatch, MeshError::ShapeNameMismatch { .. }));
        assert_eq!(mismatch.kind(), ErrorKind::Configuration);
        assert!(matches!(dup, MeshError::DuplicateDimNames { .. }));
        assert_eq!(dup.kind(), ErrorKind::Configuration);
        assert_eq!(registered, 0);
    }
}

#[test]
fn eight_ranks_with_two_names_is_rejected() {
    let errs = errors_on_ranks(8, |ctx| ctx.init_mesh("cpu", &[8], Some(&["dp", "tp"])));
    assert!(errs
        .iter()
        .all(|e| matches!(e, MeshError::ShapeNameMismatch { .. })));
}

#[test]
fn layout_outside_world_is_rejected() {
    let errs = errors_on_ranks(2, |ctx| ctx.init_mesh("cpu", &[2, 2], None));
    assert!(errs
        .iter()
        .all(|e| matches!(e, MeshError::RankOutOfRange { world_size: 2, .. })));
}

#[test]
fn partial_layout_leaves_outsiders_without_groups() {
    let out = on_ranks(3, |ctx| {
        let layout = MeshLayout::from_ranks(vec![0, 2])?;
        let mesh = ctx.mesh_from_layout("cpu", layout, Some(&["x"]))?;
        let mut t = Tensor::<u32>::full(&[2], ctx.rank() as u32 + 1);
        let outcome = mesh_broadcast(ctx, &mut t, &mesh, "x");
        Ok((mesh.coordinate().map(<[usize]>::to_vec), outcome.is_ok(), t))
    });
    assert_eq!(out[0].0, Some(vec![0]));
    assert_eq!(out[1].0, None);
    assert!(out[0].1 && !out[1].1 && out[2].1);
    assert_eq!(out[2].2.as_slice(), &[1, 1]);
    assert_eq!(out[1].2.as_slice(), &[2, 2]);
}

#[test]
fn local_rank_and_sizes() {
    let out = on_ranks(6, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2, 3], Some(&["dp", "tp"]))?;
        Ok((
            mesh.local_rank(Some("dp".into()))?,
            mesh.local_rank(Some(MeshDim::Index(1)))?,
            mesh.size(Some("tp".into()))?,
            mesh.local_rank(None).unwrap_err(),
        ))
    });
    for (rank, (dp, tp, tp_size, err)) in out.into_iter().enumerate() {
        assert_eq!((dp, tp), (rank / 3, rank % 3));
        assert_eq!(tp_size, 3);
        assert!(matches!(err, MeshError::MissingDimArg { ndim: 2 }));
    }
}
