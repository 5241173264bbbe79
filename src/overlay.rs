/// Encapsulation layer that carries overlay traffic alongside the mesh
pub trait Overlay: Send + Sync {
    fn stop(&self);
}

#[derive(Debug, Default)]
pub struct NullOverlay;

impl Overlay for NullOverlay {
    fn stop(&self) {}
}
