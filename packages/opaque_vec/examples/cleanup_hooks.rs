//! Example that demonstrates element cleanup hooks.
//!
//! Elements that own resources need to release them when the vector disposes of them. This can
//! be either the native destructor of the element type or a custom function.

use std::alloc::Layout;
use std::ptr::NonNull;

use opaque_vec::{Cleanup, MaybeOpaqueVec, OpaqueVec};

/// A record that refers to an external resource by its handle.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
struct ResourceRecord {
    handle: u32,
    flags: u32,
}

/// Releases the resource that a `ResourceRecord` refers to.
///
/// # Safety
///
/// `element` must point to a valid `ResourceRecord`.
unsafe fn release_resource(element: NonNull<u8>) {
    // SAFETY: Forwarding safety requirements to the caller.
    let record = unsafe { element.cast::<ResourceRecord>().read() };

    println!(
        "Releasing resource handle {} (flags {:#x})",
        record.handle, record.flags
    );
}

fn main() {
    println!("=== Opaque Vec Cleanup Hooks Example ===");

    println!();
    println!("--- Native destructors ---");

    // layout_of::<T>() installs the destructor of T as the cleanup hook.
    let mut strings = OpaqueVec::builder().layout_of::<String>().build();

    // SAFETY: String matches the layout used to create the vector.
    unsafe {
        strings.push("first".to_string());
        strings.push("second".to_string());
        strings.push("third".to_string());
    }

    // The String at index 0 is dropped here.
    strings.erase(0);
    println!("Strings left after erase: {}", strings.len());

    // The remaining Strings are dropped together with the vector.
    drop(strings);

    println!();
    println!("--- Custom cleanup function ---");

    let mut records = OpaqueVec::new(
        Layout::new::<ResourceRecord>(),
        Some(Cleanup::new(release_resource)),
    );

    for handle in 1..=4 {
        let record = ResourceRecord {
            handle,
            flags: handle * 0x10,
        };

        // SAFETY: The bytes form a valid ResourceRecord, which is what the hook expects.
        unsafe { records.push_raw(NonNull::from(&record).cast()) };
    }

    println!("Erasing the record at index 2");
    records.erase(2);

    println!("Dropping the vector with {} records left", records.len());
    drop(records);

    println!();
    println!("--- Optional vectors ---");

    // An absent vector behaves as an empty one that ignores mutation.
    let mut maybe_records: Option<OpaqueVec> = None;
    maybe_records.erase(0);
    println!("Absent vector size: {}", maybe_records.size());
    maybe_records.destroy();

    println!();
    println!("Cleanup hooks example completed successfully!");
}
