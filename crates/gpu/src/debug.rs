use crate::backend::{GraphicsBackend, ObjectKind};

/// Object labels and debug groups for frame debuggers.
///
/// Disabled labels cost one branch: nothing reaches the backend.
#[derive(Debug, Clone, Default)]
pub struct DebugLabels {
    enabled: bool,
    depth: usize,
}

impl DebugLabels {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, depth: 0 }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Open groups. Always 0 when disabled.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Open a group named `"{verb} {target}"`.
    pub fn push_group(&mut self, backend: &mut dyn GraphicsBackend, verb: &str, target: &str) {
        if !self.enabled {
            return;
        }
        backend.push_debug_group(&format!("{verb} {target}"));
        self.depth += 1;
    }

    pub fn pop_group(&mut self, backend: &mut dyn GraphicsBackend) {
        if !self.enabled {
            return;
        }
        if self.depth == 0 {
            tracing::warn!("pop_debug_group without a matching push");
            return;
        }
        backend.pop_debug_group();
        self.depth -= 1;
    }

    pub fn label(&self, backend: &mut dyn GraphicsBackend, kind: ObjectKind, raw: u32, label: &str) {
        if self.enabled {
            backend.object_label(kind, raw, label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{BackendCall, HeadlessBackend};

    #[test]
    fn disabled_is_silent() {
        let mut backend = HeadlessBackend::new();
        let mut labels = DebugLabels::new(false);
        labels.push_group(&mut backend, "Render", "deferred");
        labels.label(&mut backend, ObjectKind::Texture, 1, "albedo");
        labels.pop_group(&mut backend);
        assert!(backend.stats().calls().is_empty());
    }

    #[test]
    fn enabled_forwards_groups() {
        let mut backend = HeadlessBackend::new();
        let mut labels = DebugLabels::new(true);
        labels.push_group(&mut backend, "Render", "deferred");
        assert_eq!(labels.depth(), 1);
        labels.pop_group(&mut backend);
        labels.pop_group(&mut backend);
        assert_eq!(
            backend.stats().calls(),
            vec![
                BackendCall::PushDebugGroup("Render deferred".into()),
                BackendCall::PopDebugGroup
            ]
        );
    }
}
