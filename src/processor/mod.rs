pub mod liveness;
pub mod reconciler;
