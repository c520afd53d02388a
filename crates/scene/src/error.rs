use kiln_common::{ObjectId, SlotError};
use kiln_gpu::GpuError;

/// Errors from scene operations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),
    #[error("object {0} is not an actor")]
    NotAnActor(ObjectId),
    #[error("reference from {consumer} to {target} refused")]
    ReferenceRefused { target: ObjectId, consumer: ObjectId },
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}
