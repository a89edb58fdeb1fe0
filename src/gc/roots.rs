//! GC root tracking - caller-owned frames of root slots
//!
//! A frame is a contiguous block laid out as
//! `[count][count root slots][link]`, usually living on the registering
//! function's stack. Registered frames form a singly linked list threaded
//! through their link slots, newest first.

use super::{GcError, GcRef, Heap};
use crate::allocator::MemoryProvider;
use crate::logging::{error, log_misuse};
use core::cell::Cell;
use core::ptr::NonNull;

/// Untyped view of a frame in the `[count][slots][link]` layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawFrame(NonNull<usize>);

impl RawFrame {
    /// View the frame starting at `ptr`
    ///
    /// # Safety
    /// `ptr` must point to a word holding the slot count, followed by that
    /// many pointer-sized root slots and one pointer-sized link slot, all
    /// valid for reads and writes while the frame is registered.
    #[inline]
    pub unsafe fn from_ptr(ptr: *mut usize) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut usize {
        self.0.as_ptr()
    }

    /// Number of root slots
    #[inline]
    pub(crate) unsafe fn count(self) -> usize {
        self.0.as_ptr().read()
    }

    /// Contents of root slot `index`
    #[inline]
    pub(crate) unsafe fn slot(self, index: usize) -> *mut u8 {
        self.0.as_ptr().add(1 + index).cast::<*mut u8>().read()
    }

    /// Every root slot, in order
    pub(crate) unsafe fn roots(self) -> impl Iterator<Item = *mut u8> {
        (0..self.count()).map(move |i| self.slot(i))
    }

    /// The link slot, the only place its offset is computed
    #[inline]
    unsafe fn link(self) -> *mut Option<RawFrame> {
        self.0.as_ptr().add(1 + self.count()).cast::<Option<RawFrame>>()
    }

    #[inline]
    unsafe fn next(self) -> Option<RawFrame> {
        self.link().read()
    }

    #[inline]
    unsafe fn set_next(self, next: Option<RawFrame>) {
        self.link().write(next);
    }
}

/// Registry of frames whose slots are scanned as roots
#[derive(Debug, Default)]
pub struct RootRegistry {
    head: Cell<Option<RawFrame>>,
    len: Cell<usize>,
}

impl RootRegistry {
    pub const fn new() -> Self {
        Self {
            head: Cell::new(None),
            len: Cell::new(0),
        }
    }

    /// Push `frame` onto the front of the list (O(1))
    ///
    /// # Safety
    /// `frame` must satisfy [`RawFrame::from_ptr`] until it is unregistered
    /// and must not already be registered.
    pub unsafe fn register(&self, frame: RawFrame) {
        frame.set_next(self.head.get());
        self.head.set(Some(frame));
        self.len.set(self.len.get() + 1);
    }

    /// Unlink `frame`, searching linearly unless it is the head
    ///
    /// # Safety
    /// Every registered frame must still be valid.
    pub unsafe fn unregister(&self, frame: RawFrame) -> Result<(), GcError> {
        let mut prev: Option<RawFrame> = None;
        let mut cursor = self.head.get();

        while let Some(current) = cursor {
            if current == frame {
                let next = current.next();
                match prev {
                    None => self.head.set(next),
                    Some(prev) => prev.set_next(next),
                }
                current.set_next(None);
                self.len.set(self.len.get() - 1);
                return Ok(());
            }
            prev = Some(current);
            cursor = current.next();
        }

        log_misuse("unregister_frame", "frame is not registered");
        Err(GcError::FrameNotRegistered)
    }

    /// Registered frames, most recently registered first
    pub(crate) fn frames(&self) -> impl Iterator<Item = RawFrame> + '_ {
        // SAFETY: registered frames stay valid until unregistered
        core::iter::successors(self.head.get(), |frame| unsafe { frame.next() })
    }

    /// Number of registered frames
    #[inline]
    pub fn len(&self) -> usize {
        self.len.get()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }
}

/// Typed root frame with `N` slots, laid out for the raw frame protocol
///
/// Register it with [`Heap::enter`]; the returned scope unregisters it on
/// drop. Dropping a frame that is still registered aborts the process,
/// since the collector would otherwise read freed stack memory.
#[repr(C)]
pub struct RootFrame<const N: usize> {
    count: usize,
    slots: [Cell<*mut u8>; N],
    link: Cell<Option<RawFrame>>,
    registered: Cell<bool>,
}

impl<const N: usize> RootFrame<N> {
    pub fn new() -> Self {
        Self {
            count: N,
            slots: core::array::from_fn(|_| Cell::new(core::ptr::null_mut())),
            link: Cell::new(None),
            registered: Cell::new(false),
        }
    }

    /// Store `obj` (or clear the slot) at `index`
    #[inline]
    pub fn set(&self, index: usize, obj: Option<GcRef<'_>>) {
        let ptr = obj.map_or(core::ptr::null_mut(), |obj| obj.as_ptr());
        self.slots[index].set(ptr);
    }

    /// Store an arbitrary payload pointer at `index`
    ///
    /// Pointers that do not name a live GC object are ignored by the
    /// collector.
    #[inline]
    pub fn set_raw(&self, index: usize, ptr: *mut u8) {
        self.slots[index].set(ptr);
    }

    #[inline]
    pub fn get(&self, index: usize) -> *mut u8 {
        self.slots[index].get()
    }

    pub fn clear(&self) {
        self.slots.iter().for_each(|slot| slot.set(core::ptr::null_mut()));
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered.get()
    }

    #[inline]
    pub fn as_raw(&self) -> RawFrame {
        RawFrame(NonNull::from(self).cast::<usize>())
    }
}

impl<const N: usize> Default for RootFrame<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Drop for RootFrame<N> {
    fn drop(&mut self) {
        if self.registered.get() {
            error!(frame = ?self.as_raw(), "root frame dropped while registered");
            std::process::abort();
        }
    }
}

/// RAII registration of a [`RootFrame`]
///
/// Usage:
/// ```ignore
/// let frame = RootFrame::<2>::new();
/// let _scope = heap.enter(&frame)?;
/// frame.set(0, Some(heap.allocate(16, 1)?));
/// // frame slots are roots until _scope drops
/// ```
pub struct FrameScope<'a, P: MemoryProvider> {
    heap: &'a Heap<P>,
    frame: RawFrame,
    registered: &'a Cell<bool>,
}

impl<P: MemoryProvider> Heap<P> {
    /// Register `frame` for as long as the returned scope lives
    pub fn enter<'a, const N: usize>(&'a self, frame: &'a RootFrame<N>) -> Result<FrameScope<'a, P>, GcError> {
        if frame.registered.get() {
            log_misuse("enter", "frame is already registered");
            return Err(GcError::FrameAlreadyRegistered);
        }

        // SAFETY: the frame is borrowed for 'a and unregistered when the scope drops
        unsafe { self.roots().register(frame.as_raw()) };
        frame.registered.set(true);

        Ok(FrameScope {
            heap: self,
            frame: frame.as_raw(),
            registered: &frame.registered,
        })
    }
}

impl<P: MemoryProvider> FrameScope<'_, P> {
    pub fn frame(&self) -> RawFrame {
        self.frame
    }
}

impl<P: MemoryProvider> Drop for FrameScope<'_, P> {
    fn drop(&mut self) {
        // SAFETY: the frame is still borrowed by this scope
        if let Err(err) = unsafe { self.heap.roots().unregister(self.frame) } {
            log_misuse("frame_scope_drop", &err.to_string());
        }
        self.registered.set(false);
    }
}
