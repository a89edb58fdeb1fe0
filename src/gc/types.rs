//! Type descriptors - where an object's references live
//!
//! The collector only follows references it has been told about. Objects
//! whose type id has no descriptor are treated as opaque: they survive
//! when rooted but keep nothing else alive.

use super::GcError;
use core::ptr::NonNull;
use std::collections::HashMap;

/// Word size of a reference slot
const WORD: usize = core::mem::size_of::<usize>();

/// Called once on an unreachable object before its slot is reclaimed
///
/// Receives the payload address and payload size. Must not touch the heap.
pub type Finalizer = unsafe fn(payload: NonNull<u8>, size: usize);

/// Reference layout of a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeLayout {
    /// No references
    Opaque,
    /// References at these byte offsets into the payload
    Offsets(Box<[usize]>),
    /// Every aligned word of the payload is a reference
    AllReferences,
}

/// Per-type metadata consulted by mark and sweep
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub layout: TypeLayout,
    pub finalizer: Option<Finalizer>,
}

impl TypeDescriptor {
    pub fn opaque() -> Self {
        Self {
            layout: TypeLayout::Opaque,
            finalizer: None,
        }
    }

    pub fn with_offsets(offsets: impl Into<Box<[usize]>>) -> Self {
        Self {
            layout: TypeLayout::Offsets(offsets.into()),
            finalizer: None,
        }
    }

    pub fn all_references() -> Self {
        Self {
            layout: TypeLayout::AllReferences,
            finalizer: None,
        }
    }

    pub fn finalized_by(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    fn validate(&self, type_id: u64) -> Result<(), GcError> {
        if let TypeLayout::Offsets(offsets) = &self.layout {
            if let Some(&offset) = offsets.iter().find(|&&off| off % WORD != 0) {
                return Err(GcError::InvalidDescriptor { type_id, offset });
            }
        }
        Ok(())
    }

    /// Call `visit` with the contents of every reference slot of a payload
    ///
    /// Offsets past the end of the payload are ignored.
    ///
    /// # Safety
    /// `payload` must be word aligned and readable for `size` bytes.
    pub(crate) unsafe fn for_each_reference(&self, payload: NonNull<u8>, size: usize, mut visit: impl FnMut(*mut u8)) {
        let words = payload.as_ptr().cast::<*mut u8>();
        match &self.layout {
            TypeLayout::Opaque => {}
            TypeLayout::Offsets(offsets) => {
                for &offset in offsets.iter().filter(|&&off| off.checked_add(WORD).map_or(false, |end| end <= size)) {
                    visit(words.add(offset / WORD).read());
                }
            }
            TypeLayout::AllReferences => {
                for i in 0..size / WORD {
                    visit(words.add(i).read());
                }
            }
        }
    }
}

/// Registry mapping type ids to descriptors
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<u64, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptor` for `type_id`; each id can be registered once
    pub fn register(&mut self, type_id: u64, descriptor: TypeDescriptor) -> Result<(), GcError> {
        descriptor.validate(type_id)?;
        if self.types.contains_key(&type_id) {
            return Err(GcError::TypeAlreadyRegistered(type_id));
        }
        self.types.insert(type_id, descriptor);
        Ok(())
    }

    #[inline]
    pub fn get(&self, type_id: u64) -> Option<&TypeDescriptor> {
        self.types.get(&type_id)
    }

    #[inline]
    pub fn has_finalizer(&self, type_id: u64) -> bool {
        self.get(type_id).map_or(false, |desc| desc.finalizer.is_some())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
