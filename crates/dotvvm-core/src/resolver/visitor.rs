use super::tree::{
    PropertyValue, ResolvedBinding, ResolvedControl, ResolvedText, ResolvedTreeRoot,
};

/// Depth-first walk over a resolved tree. Default methods recurse; override
/// a method and call the matching `walk_*` function to keep descending.
pub trait ResolvedControlTreeVisitor {
    fn visit_view(&mut self, view: &ResolvedTreeRoot) {
        walk_view(self, view);
    }

    fn visit_control(&mut self, control: &ResolvedControl) {
        walk_control(self, control);
    }

    fn visit_text(&mut self, _text: &ResolvedText) {}

    fn visit_binding(&mut self, _binding: &ResolvedBinding) {}
}

pub fn walk_view<V: ResolvedControlTreeVisitor + ?Sized>(visitor: &mut V, view: &ResolvedTreeRoot) {
    for node in &view.content {
        node.accept(visitor);
    }
}

/// Visits property bindings first, then children.
pub fn walk_control<V: ResolvedControlTreeVisitor + ?Sized>(
    visitor: &mut V,
    control: &ResolvedControl,
) {
    for setter in control.properties.iter().chain(&control.attributes) {
        if let PropertyValue::Binding(binding) = &setter.value {
            visitor.visit_binding(binding);
        }
    }
    for child in &control.children {
        child.accept(visitor);
    }
}
