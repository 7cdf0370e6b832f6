use std::path::{Path, PathBuf};

/// Images this run believes are attached, in the order they were attached.
///
/// An image goes in only after its attach request succeeded and comes out
/// only once a detach has been issued for it. The registry exists to
/// guarantee cleanup; it plays no part in device correlation.
#[derive(Debug, Default)]
pub struct AttachedImageRegistry {
    images: Vec<PathBuf>,
}

impl AttachedImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `image` as attached. Recording the same image twice is a no-op.
    pub fn insert(&mut self, image: &Path) {
        if !self.contains(image) {
            self.images.push(image.to_path_buf());
        }
    }

    /// Forgets `image`, returning whether it was recorded.
    pub fn remove(&mut self, image: &Path) -> bool {
        let before = self.images.len();
        self.images.retain(|p| p != image);
        self.images.len() != before
    }

    pub fn contains(&self, image: &Path) -> bool {
        self.images.iter().any(|p| p == image)
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.images.iter().map(PathBuf::as_path)
    }

    /// Removes and returns every recorded image, oldest first.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent_and_ordered() {
        let mut registry = AttachedImageRegistry::new();
        registry.insert(Path::new("b.iso"));
        registry.insert(Path::new("a.iso"));
        registry.insert(Path::new("b.iso"));

        assert_eq!(registry.len(), 2);
        let images: Vec<_> = registry.iter().collect();
        assert_eq!(images, vec![Path::new("b.iso"), Path::new("a.iso")]);
    }

    #[test]
    fn remove_reports_membership() {
        let mut registry = AttachedImageRegistry::new();
        registry.insert(Path::new("a.iso"));
        assert!(registry.remove(Path::new("a.iso")));
        assert!(!registry.remove(Path::new("a.iso")));
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry = AttachedImageRegistry::new();
        registry.insert(Path::new("a.iso"));
        registry.insert(Path::new("b.iso"));
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }
}
