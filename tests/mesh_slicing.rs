mod util;
use device_mesh::prelude::*;
use util::*;

#[test]
fn dp_tp_slices_of_two_by_four() {
    let out = on_ranks(8, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2, 4], Some(&["DP", "TP"]))?;
        let tp = ctx.slice(&mesh, "TP")?;
        let dp = ctx.slice(&mesh, "DP")?;
        Ok((tp.layout().ranks().to_vec(), dp.layout().ranks().to_vec()))
    });
    for (r, (tp, dp)) in out.into_iter().enumerate() {
        let base = 4 * (r / 4);
        assert_eq!(tp, (base..base + 4).collect::<Vec<_>>());
        assert_eq!(dp, vec![r % 4, r % 4 + 4]);
    }
}

#[test]
fn slices_reuse_parent_groups() {
    let out = on_ranks(4, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let before = ctx.registry().len();
        let tp = ctx.slice(&mesh, "tp")?;
        Ok((
            tp.group(0)? == mesh.group("tp")?,
            ctx.registry().len() - before,
            tp.dim_names().map(<[String]>::to_vec),
        ))
    });
    for (same, new_groups, names) in out {
        assert!(same);
        assert_eq!(new_groups, 0);
        assert_eq!(names, Some(vec!["tp".to_string()]));
    }
}

#[test]
fn repeated_slicing_is_idempotent() {
    let out = on_ranks(4, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let a = ctx.slice(&mesh, "tp")?;
        let b = ctx.slice(&mesh, "tp")?;
        Ok((a.id() == b.id(), Mesh::ptr_eq(&a, &b)))
    });
    assert!(out.iter().all(|&(ids, ptr)| ids && ptr));
}

#[test]
fn one_dim_mesh_slices_to_itself() {
    let out = on_ranks(2, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2], Some(&["w"]))?;
        let same = ctx.slice(&mesh, "w")?;
        let err = ctx.slice(&mesh, "dp").unwrap_err();
        Ok((same.id() == mesh.id(), err.kind()))
    });
    for (same, kind) in out {
        assert!(same);
        assert_eq!(kind, ErrorKind::Unsupported);
    }
}

#[test]
fn unnamed_one_dim_mesh_cannot_be_sliced() {
    let errs = on_ranks(8, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[8], None)?;
        Ok(ctx.slice(&mesh, "DP").unwrap_err())
    });
    for err in errs {
        assert!(matches!(err, MeshError::CannotSlice { ndim: 1, .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}

#[test]
fn slicing_errors_are_classified() {
    let out = on_ranks(4, |ctx| {
        let named = ctx.init_mesh("cpu", &[2, 2], Some(&["dp", "tp"]))?;
        let unnamed = ctx.init_mesh("cpu", &[2, 2], None)?;
        Ok((
            ctx.slice(&named, "pp").unwrap_err(),
            ctx.slice(&unnamed, "dp").unwrap_err(),
        ))
    });
    for (missing, no_names) in out {
        match &missing {
            MeshError::DimNameNotFound { name, valid } => {
                assert_eq!(name, "pp");
                assert_eq!(valid, &["dp", "tp"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(missing.kind(), ErrorKind::Lookup);
        assert!(matches!(no_names, MeshError::NoDimNames));
        assert_eq!(no_names.kind(), ErrorKind::Configuration);
    }
}

#[test]
fn multi_dim_slices_and_parents() {
    let out = on_ranks(8, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2, 2, 2], Some(&["pp", "dp", "tp"]))?;
        let dp_tp = ctx.slice_dims(&mesh, &["dp", "tp"])?;
        let tp = ctx.slice(&dp_tp, "tp")?;
        let whole = ctx.slice_dims(&mesh, &["pp", "dp", "tp"])?;
        let reversed = ctx.slice_dims(&mesh, &["tp", "dp"]).unwrap_err();
        Ok((
            dp_tp.layout().clone(),
            tp.layout().ranks().to_vec(),
            ctx.parent_mesh(&tp).map(|p| p.id()) == Some(dp_tp.id()),
            ctx.parent_dim(&tp),
            ctx.parent_dim(&dp_tp),
            ctx.dim_index_by_name(&tp, "tp")?,
            Mesh::ptr_eq(&whole, &mesh),
            reversed.kind(),
        ))
    });
    for (r, (dp_tp, tp, parent_ok, tp_dim, dp_tp_dim, root_idx, whole, rev)) in
        out.into_iter().enumerate()
    {
        let base = 4 * (r / 4);
        assert_eq!(dp_tp.shape(), &[2, 2]);
        assert_eq!(dp_tp.ranks(), (base..base + 4).collect::<Vec<_>>().as_slice());
        assert_eq!(tp, vec![2 * (r / 2), 2 * (r / 2) + 1]);
        assert!(parent_ok);
        assert_eq!(tp_dim, Some(1));
        assert_eq!(dp_tp_dim, None);
        assert_eq!(root_idx, 2);
        assert!(whole);
        assert_eq!(rev, ErrorKind::Unsupported);
    }
}

#[test]
fn root_has_no_parent() {
    let out = on_ranks(2, |ctx| {
        let mesh = ctx.init_mesh("cpu", &[2], None)?;
        Ok((ctx.parent_mesh(&mesh).is_none(), ctx.parent_dim(&mesh)))
    });
    assert!(out.iter().all(|&(none, dim)| none && dim.is_none()));
}
