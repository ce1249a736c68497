//! Data module: the dense tensor collectives move and the sharding helpers
//! that split it.

pub mod shard;
pub mod tensor;

pub use shard::Shard;
pub use tensor::{Element, ReduceOp, Tensor};
