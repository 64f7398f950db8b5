//! The `base` crate defines the channel-related things which are
//! useful in both the emulator and other associated tools.  The idea
//! is that if you want to write a tool which decodes channel programs
//! or status buffers in a memory image, it would depend on the base
//! crate but would not need to depend on the emulator library itself.

mod condition;
mod iocd;
mod status;
mod types;

pub mod collections;
pub mod prelude;

#[macro_export]
macro_rules! addr {
    ($n:expr) => {
        $crate::prelude::Address::new::<{ $n }>()
    };
}

#[test]
fn test_addr() {
    use prelude::Address;
    let a: Address = addr!(0x00_1000);
    let b: Address = Address::try_from(0x1000_u32).expect("test data should be in range");
    assert_eq!(a, b);
    assert_eq!(u32::from(a), 0x1000);
}
