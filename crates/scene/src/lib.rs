//! Scene objects and their lifecycle.
//!
//! A [`SceneContext`] tracks every actor, component and shared resource of a
//! scene. Who keeps whom alive is recorded in the [`Lifecycle`] ledger as
//! consumer edges, each either [`EdgeKind::Owns`] or [`EdgeKind::References`].
//! Objects whose last consumer lets go are only marked; their GPU resources
//! are released at the next synchronization point ([`SceneContext::sync`]).
//!
//! # Invariants
//! - Objects are finalized only at the synchronization point, each at most once.
//! - An object with at least one live consumer is never finalized.
//! - A reference taken before the sweep cancels a pending deallocation.
//! - Owned dependencies die with their last owner; referenced ones survive
//!   while anyone else still holds them.
//! - Reference cycles with no external consumer are not collected.

mod actor;
mod components;
mod context;
mod error;
mod lifecycle;
mod object;
mod tasks;

pub use actor::{Actor, ActorScript};
pub use components::{BlendMode, LightComponent, LightKind, Material, MeshComponent, ShadowSlots};
pub use context::{SceneContext, SyncReport, UpdateReport};
pub use error::SceneError;
pub use lifecycle::{EdgeKind, Lifecycle};
pub use object::{Capabilities, FrameInfo, SceneObject};
pub use tasks::{FrameGate, Task, TaskQueue};

pub fn crate_info() -> &'static str {
    "kiln-scene v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("scene"));
    }
}
