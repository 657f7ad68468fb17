//! Runtime Type Interface (spec.md §4.8, L5).
//!
//! A descriptor is an opaque value answering: size, alignment, destroy,
//! and optionally copy/move construction. The core treats it as a trait
//! object and never inspects concrete types; higher layers (out of core
//! scope, spec.md §1) add invoke/hash/equality on top.
//!
//! Descriptors are value-like and cheap to copy (spec.md §3.6): we
//! represent a "handle" to one as `&'static dyn RuntimeType`, a fat pointer
//! that is `Copy` and fits in two machine words, exactly like
//! `density::runtime_type` is a small trivially-copyable value in the
//! original.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Mutex, OnceLock};

/// The minimal contract the core requires of a runtime type descriptor.
///
/// # Safety
///
/// Implementations must ensure `destroy` actually drops the value at
/// `ptr`, that `size`/`align` match the layout used to allocate `ptr`, and
/// that `copy_construct`, if it returns `true`, leaves `dst` holding a
/// valid, independently destructible value.
pub unsafe trait RuntimeType: Send + Sync + 'static {
    /// Size in bytes of one element of this type.
    fn size(&self) -> usize;

    /// Required alignment of one element of this type.
    fn align(&self) -> usize;

    /// Destroys (drops) the element at `ptr`. `ptr` must point to a live,
    /// properly initialized element of this type.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `size()` bytes and must
    /// not be used again afterwards.
    unsafe fn destroy(&self, ptr: *mut u8);

    /// A human-readable name, used only in diagnostics and in
    /// [`crate::error::PageQueueError::DescriptorFeatureMissing`].
    fn type_name(&self) -> &'static str {
        "<unknown>"
    }

    /// The identity of the concrete type this descriptor describes, used by
    /// [`ConsumeOperation::element`](crate::transaction::ConsumeOperation::element)
    /// to reject a mismatched cast.
    fn type_id(&self) -> TypeId;

    /// Copy-constructs a new element at `dst` from `*src`. Returns `false`
    /// (and does nothing) if this descriptor was not built for a `Clone`
    /// type (see [`descriptor_of_cloneable`]).
    ///
    /// # Safety
    /// `src` must point to a live element; `dst` must be valid for writes
    /// of `size()` bytes and not aliasing `src`.
    unsafe fn copy_construct(&self, _dst: *mut u8, _src: *const u8) -> bool {
        false
    }

    /// Move-constructs a new element at `dst` from `*src` by relocating its
    /// bytes; valid for every type, since a Rust move is always a bitwise
    /// relocation. The caller must not call `destroy` on `src` afterwards.
    ///
    /// # Safety
    /// `src` must point to a live element; `dst` must be valid for writes
    /// of `size()` bytes and not overlap `src`.
    unsafe fn move_construct(&self, dst: *mut u8, src: *mut u8) {
        std::ptr::copy_nonoverlapping(src, dst, self.size());
    }
}

/// A cheap-to-copy handle to a descriptor, stored inline in a slot
/// (spec.md §3.3). Two machine words: data pointer + vtable pointer.
#[derive(Clone, Copy)]
pub struct TypeHandle(pub &'static dyn RuntimeType);

impl TypeHandle {
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.0.align()
    }

    #[inline]
    pub unsafe fn destroy(&self, ptr: *mut u8) {
        self.0.destroy(ptr)
    }

    #[inline]
    pub fn as_runtime_type(&self) -> &'static dyn RuntimeType {
        self.0
    }
}

/// A stateless witness of `T`'s layout and destructor; never holds a live
/// `T` itself, so it is trivially `Send + Sync`.
struct Typed<T>(PhantomData<fn() -> T>);

unsafe impl<T> Send for Typed<T> {}
unsafe impl<T> Sync for Typed<T> {}

unsafe impl<T: Send + Sync + 'static> RuntimeType for Typed<T> {
    fn size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn align(&self) -> usize {
        std::mem::align_of::<T>()
    }

    unsafe fn destroy(&self, ptr: *mut u8) {
        std::ptr::drop_in_place(ptr as *mut T);
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }
}

/// Like [`Typed`], but additionally backs `copy_construct` with `T::clone`.
/// A distinct type (rather than a flag on `Typed`) so that `descriptor_of`
/// never needs a `Clone` bound: the façade picks this descriptor only for
/// the `push`/`dyn_push_copy` call sites that already require `T: Clone`
/// in their own signature (spec.md §4.8: feature detection happens at the
/// façade, not in the core).
struct TypedCopyable<T>(PhantomData<fn() -> T>);

unsafe impl<T> Send for TypedCopyable<T> {}
unsafe impl<T> Sync for TypedCopyable<T> {}

unsafe impl<T: Clone + Send + Sync + 'static> RuntimeType for TypedCopyable<T> {
    fn size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn align(&self) -> usize {
        std::mem::align_of::<T>()
    }

    unsafe fn destroy(&self, ptr: *mut u8) {
        std::ptr::drop_in_place(ptr as *mut T);
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8) -> bool {
        let value = (*(src as *const T)).clone();
        std::ptr::write(dst as *mut T, value);
        true
    }
}

type Registry = Mutex<HashMap<TypeId, &'static dyn RuntimeType>>;

fn plain_registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cloneable_registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the process-wide descriptor handle for `T`, creating it on
/// first use. Descriptors are looked up by `TypeId` in a process-scoped
/// registry rather than via a per-monomorphization `static`, so the same
/// handle is returned no matter how many queues share it — mirroring the
/// teacher's process-scoped `stats_main`/`heap_main` singletons (spec.md
/// §9 "Global state ... model as a lazily initialised shared resource").
pub fn descriptor_of<T: Send + Sync + 'static>() -> &'static dyn RuntimeType {
    let id = TypeId::of::<T>();
    let mut registry = plain_registry().lock().expect("descriptor registry poisoned");
    *registry
        .entry(id)
        .or_insert_with(|| Box::leak(Box::new(Typed::<T>(PhantomData))))
}

/// Like [`descriptor_of`], but the returned descriptor also supports
/// `copy_construct` via `T::clone`.
pub fn descriptor_of_cloneable<T: Clone + Send + Sync + 'static>() -> &'static dyn RuntimeType {
    let id = TypeId::of::<T>();
    let mut registry = cloneable_registry().lock().expect("descriptor registry poisoned");
    *registry
        .entry(id)
        .or_insert_with(|| Box::leak(Box::new(TypedCopyable::<T>(PhantomData))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_type_shares_one_descriptor_instance() {
        let a = descriptor_of::<i32>();
        let b = descriptor_of::<i32>();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.size(), std::mem::size_of::<i32>());
        assert_eq!(a.align(), std::mem::align_of::<i32>());
    }

    #[test]
    fn distinct_types_get_distinct_descriptors() {
        let a = descriptor_of::<i32>();
        let b = descriptor_of::<i64>();
        assert_ne!(a.type_id(), b.type_id());
    }

    #[test]
    fn cloneable_descriptor_copies() {
        let d = descriptor_of_cloneable::<String>();
        let src = String::from("hello");
        let mut dst = std::mem::MaybeUninit::<String>::uninit();
        unsafe {
            let ok = d.copy_construct(dst.as_mut_ptr() as *mut u8, &src as *const String as *const u8);
            assert!(ok);
            let copied = dst.assume_init();
            assert_eq!(copied, "hello");
        }
    }
}
