pub mod batch_flow;
pub mod session_ctx;

pub use batch_flow::{BatchFlow, BatchOutcome, FixedGate, ImageMode, PartialContentGate};
pub use session_ctx::SessionContext;
