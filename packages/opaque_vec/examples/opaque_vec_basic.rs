//! Example that demonstrates the basic usage shown in the README.md file.
//!
//! This shows how to use `OpaqueVec` to store values of a type it does not know at compile time.

use std::alloc::Layout;
use std::ptr::NonNull;

use opaque_vec::OpaqueVec;

fn main() {
    println!("=== Opaque Vec Basic Example ===");

    // Create a vector for storing values that match the layout of `u64`.
    let layout = Layout::new::<u64>();
    let mut vec = OpaqueVec::builder().layout(layout).capacity(0).build();

    println!(
        "Created vector: len {}, capacity {}, element size {}",
        vec.len(),
        vec.capacity(),
        vec.element_size()
    );

    // Append values by copying their bytes in. The capacity doubles as needed.
    for value in [42_u64, 123, 7, 99, 1000] {
        // SAFETY: The bytes of a u64 are a valid element and a u64 owns nothing.
        unsafe { vec.push_raw(NonNull::from(&value).cast()) };

        println!(
            "Pushed {value}: len {}, capacity {}",
            vec.len(),
            vec.capacity()
        );
    }

    assert_eq!(vec.capacity(), 8);

    // Erase from the middle. The following elements shift down to close the gap.
    vec.erase(1);

    let remaining: Vec<u64> = (0..vec.len())
        .map(|index| {
            // SAFETY: The vector holds u64 values and index is in range.
            unsafe { *vec.get::<u64>(index).expect("index is in range") }
        })
        .collect();

    println!("After erasing index 1: {remaining:?}");
    assert_eq!(remaining, [42, 7, 99, 1000]);

    // Erasing past the end is silently ignored.
    vec.erase(100);
    assert_eq!(vec.len(), 4);

    println!("Basic example completed successfully!");
}
