#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A type-erased growable array that stores elements described only by their memory layout.
//!
//! This crate provides [`OpaqueVec`], a contiguous, dynamically growing array whose element
//! type is not part of its type. Elements of any type may be stored as long as they match the
//! [`std::alloc::Layout`] defined at creation, and they are copied in and read out by raw
//! bytes or through typed `unsafe` accessors.
//!
//! # Key Features
//!
//! - **Type-erased storage**: Works with any element type matching the vector's layout
//! - **Amortized O(1) append**: Capacity doubles when the vector is full
//! - **Compacting removal**: [`erase()`](OpaqueVec::erase) keeps live elements contiguous
//! - **Element cleanup hooks**: A [`Cleanup`] runs on every element the vector disposes of,
//!   either the native destructor of the element type or a custom function
//! - **Zeroed spare capacity**: Slots that hold no element always contain zero bytes
//! - **Pluggable allocator**: Any [`std::alloc::GlobalAlloc`] can provide the storage
//! - **Permissive contract**: Out-of-range removal is a no-op and `Option<OpaqueVec>` works
//!   as a null-tolerant handle via [`MaybeOpaqueVec`]
//! - **Flexible drop policies**: Configure behavior when the vector is dropped with remaining
//!   elements
//!
//! # Growth and pointer validity
//!
//! The vector is owned by a single binding and mutated in place, so growth is transparent to
//! the owner. Raw element pointers obtained via [`OpaqueVec::as_ptr()`] or
//! [`OpaqueVec::get_ptr()`] are invalidated by any operation that may grow or compact the
//! vector.
//!
//! # Allocation failure
//!
//! The infallible operations treat allocation failure as fatal and abort via
//! [`std::alloc::handle_alloc_error`]. [`OpaqueVec::try_reserve()`] and
//! [`OpaqueVec::try_push_raw()`] report it as an [`Error`] instead.
//!
//! # Examples
//!
//! ## Typed elements with native cleanup
//!
//! ```rust
//! use opaque_vec::OpaqueVec;
//!
//! // The layout and the destructor both come from the type.
//! let mut vec = OpaqueVec::builder().layout_of::<String>().build();
//!
//! // SAFETY: String matches the layout used to create the vector.
//! unsafe {
//!     vec.push("first".to_string());
//!     vec.push("second".to_string());
//! }
//!
//! assert_eq!(vec.len(), 2);
//! assert_eq!(vec.capacity(), 2);
//!
//! // SAFETY: The vector holds String values.
//! assert_eq!(unsafe { vec.get::<String>(0) }.unwrap(), "first");
//!
//! // Drops "first" and moves "second" to index 0.
//! vec.erase(0);
//! ```
//!
//! ## Raw bytes with a custom cleanup hook
//!
//! ```rust
//! use std::alloc::Layout;
//! use std::ptr::NonNull;
//!
//! use opaque_vec::{Cleanup, OpaqueVec};
//!
//! unsafe fn release(element: NonNull<u8>) {
//!     // SAFETY: The vector only holds [u8; 4] records.
//!     let record = unsafe { element.cast::<[u8; 4]>().read() };
//!     println!("releasing record {record:?}");
//! }
//!
//! let mut vec = OpaqueVec::with_capacity(0, Layout::new::<[u8; 4]>(), Some(Cleanup::new(release)));
//!
//! let record = [1_u8, 2, 3, 4];
//! // SAFETY: The bytes form a valid record and the record owns nothing else.
//! unsafe { vec.push_raw(NonNull::from(&record).cast()) };
//!
//! assert_eq!(vec.len(), 1);
//! assert_eq!(vec.capacity(), 1);
//!
//! // `release` runs for the remaining record here.
//! drop(vec);
//! ```

mod builder;
mod cleanup;
mod drop_policy;
mod error;
mod global;
mod maybe;
mod storage;
mod vec;

pub use builder::*;
pub use cleanup::*;
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub use global::*;
pub use maybe::*;
pub use vec::OpaqueVec;
