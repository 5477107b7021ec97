use latticed::core::rpc::pack::{PackBuf, UnpackBuf};
use proptest::prelude::*;

proptest! {
    /// Any interleaving of scalars and strings survives a pack/unpack
    /// round trip in order.
    #[test]
    fn mixed_scalars_roundtrip(
        bytes in prop::collection::vec(any::<u8>(), 0..16),
        shorts in prop::collection::vec(any::<u16>(), 0..16),
        words in prop::collection::vec(any::<u32>(), 0..16),
        longs in prop::collection::vec(any::<u64>(), 0..16),
    ) {
        let mut buf = PackBuf::new();
        for &v in &bytes { buf.pack8(v); }
        for &v in &shorts { buf.pack16(v); }
        for &v in &words { buf.pack32(v); }
        for &v in &longs { buf.pack64(v); }

        let mut rd = UnpackBuf::new(buf.into_bytes());
        for &v in &bytes { prop_assert_eq!(rd.unpack8().unwrap(), v); }
        for &v in &shorts { prop_assert_eq!(rd.unpack16().unwrap(), v); }
        for &v in &words { prop_assert_eq!(rd.unpack32().unwrap(), v); }
        for &v in &longs { prop_assert_eq!(rd.unpack64().unwrap(), v); }
        prop_assert_eq!(rd.remaining(), 0);
    }

    /// Strings, including empty and unicode, survive with the null/empty
    /// distinction intact.
    #[test]
    fn strings_roundtrip(strings in prop::collection::vec(
        prop::option::of("[a-zA-Z0-9 _.:,/\\-]{0,40}|\\PC{0,10}"), 0..12)
    ) {
        let mut buf = PackBuf::new();
        for s in &strings {
            buf.packstr(s.as_deref());
        }
        let mut rd = UnpackBuf::new(buf.into_bytes());
        for s in &strings {
            prop_assert_eq!(&rd.unpackstr().unwrap(), s);
        }
    }

    /// Opaque memory blocks round trip byte for byte.
    #[test]
    fn memory_roundtrip(blocks in prop::collection::vec(
        prop::collection::vec(any::<u8>(), 0..64), 0..8)
    ) {
        let mut buf = PackBuf::new();
        for block in &blocks {
            buf.packmem(block);
        }
        let mut rd = UnpackBuf::new(buf.into_bytes());
        for block in &blocks {
            prop_assert_eq!(&rd.unpackmem().unwrap(), block);
        }
    }
}
