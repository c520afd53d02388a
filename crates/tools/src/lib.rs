//! Developer tooling: scene inspector and hierarchy dumps.
//!
//! # Invariants
//! - Tools only read scene and GPU state; nothing here adds or removes
//!   references.

mod inspector;

pub use inspector::{InspectorSummary, ObjectInfo, SceneInspector};

pub fn crate_info() -> &'static str {
    "kiln-tools v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("tools"));
    }
}
