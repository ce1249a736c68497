#![allow(dead_code)]
use device_mesh::prelude::*;

/// Config used by every multi-rank test: a receive timeout turns a hang into
/// a failure.
pub fn test_config() -> MeshConfig {
    MeshConfig {
        recv_timeout_ms: Some(10_000),
        ..MeshConfig::default()
    }
}

/// Run `f` on `n` in-process ranks and unwrap every rank's result.
pub fn on_ranks<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(&LocalContext) -> Result<R, MeshError> + Sync,
{
    run_local(n, &test_config(), f)
        .into_iter()
        .enumerate()
        .map(|(rank, r)| r.unwrap_or_else(|e| panic!("rank {rank} failed: {e}")))
        .collect()
}

/// Run `f` on `n` in-process ranks and keep every rank's error.
pub fn errors_on_ranks<R, F>(n: usize, f: F) -> Vec<MeshError>
where
    R: Send + std::fmt::Debug,
    F: Fn(&LocalContext) -> Result<R, MeshError> + Sync,
{
    run_local(n, &test_config(), f)
        .into_iter()
        .map(|r| r.expect_err("expected an error"))
        .collect()
}

/// Tensor whose entries encode `(rank, index)`.
pub fn tagged(rank: usize, shape: &[usize]) -> Tensor<i64> {
    Tensor::from_fn(shape, |i| (rank * 1000 + i) as i64)
}
