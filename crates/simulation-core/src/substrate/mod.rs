pub mod backend;
pub mod balances;
pub mod engine;
pub mod errors;
pub mod events;
pub mod extrinsic;

pub use backend::SubstrateFork;
pub use engine::SubstrateEngine;
