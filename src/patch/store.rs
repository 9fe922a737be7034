use crate::{error::PatchError, patch::Patch};

/// Source of patch snapshots. Loads are synchronous and only ever run on the
/// background loader or before audio starts.
pub trait PatchStore: Send + Sync {
    fn load(&self, id: usize) -> Result<Patch, PatchError>;

    fn patch_count(&self) -> usize;

    /// Map a MIDI bank/program pair onto a patch id.
    fn patch_for_program(&self, bank: u16, program: u8) -> Option<usize> {
        let id = bank as usize * 128 + program as usize;
        (id < self.patch_count()).then_some(id)
    }
}

/// Patches held in memory, addressed by position.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatchStore {
    patches: Vec<Patch>,
}

impl MemoryPatchStore {
    pub fn new(patches: Vec<Patch>) -> Self {
        Self { patches }
    }

    pub fn push(&mut self, patch: Patch) -> usize {
        self.patches.push(patch);
        self.patches.len() - 1
    }
}

impl PatchStore for MemoryPatchStore {
    fn load(&self, id: usize) -> Result<Patch, PatchError> {
        let patch = self.patches.get(id).ok_or(PatchError::NotFound(id))?;
        patch.validate(id)?;
        Ok(patch.clone())
    }

    fn patch_count(&self) -> usize {
        self.patches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_by_position() {
        let mut store = MemoryPatchStore::default();
        let id = store.push(Patch::named("pad"));
        assert_eq!(store.load(id).map(|p| p.name), Ok("pad".to_string()));
        assert_eq!(store.load(7).unwrap_err(), PatchError::NotFound(7));
    }

    #[test]
    fn program_mapping_respects_count() {
        let store = MemoryPatchStore::new(vec![Patch::default(); 130]);
        assert_eq!(store.patch_for_program(0, 5), Some(5));
        assert_eq!(store.patch_for_program(1, 1), Some(129));
        assert_eq!(store.patch_for_program(1, 2), None);
    }

    #[test]
    fn malformed_patches_are_rejected() {
        let mut broken = Patch::default();
        broken.values.truncate(3);
        let store = MemoryPatchStore::new(vec![broken]);
        assert!(matches!(
            store.load(0),
            Err(PatchError::ParameterCount { found: 3, .. })
        ));
    }
}
