//! Byte sources: bounds, short reads, writes and windows.

use binform::source::{BytesSource, EmptySource, FileSource, ProxySource, Source, SourceError};
use binform::{shared, Error, Tree, Type};
use std::io::Write;

#[test]
fn test_bytes_source_reads_and_grows() {
    let mut source = BytesSource::new(vec![1, 2, 3, 4]);
    assert_eq!(source.size(), Some(4));
    source.seek(1).expect("seek");
    assert_eq!(source.consume(2).expect("consume"), vec![2, 3]);

    match source.consume(5) {
        Err(SourceError::Consume {
            offset,
            desired,
            got,
        }) => {
            assert_eq!((offset, desired, got), (3, 5, 1));
        }
        other => panic!("unexpected {other:?}"),
    }

    source.seek(3).expect("seek");
    assert_eq!(source.store(&[9, 9, 9]).expect("store"), 3);
    assert_eq!(source.as_slice(), &[1, 2, 3, 9, 9, 9]);
}

#[test]
fn test_seek_past_end_is_out_of_bounds() {
    let mut source = BytesSource::new(vec![0; 2]);
    assert!(matches!(
        source.seek(3),
        Err(SourceError::OutOfBounds { offset: 3, size: 2 })
    ));
    assert_eq!(source.seek(2).expect("seek to end"), 0);
    assert_eq!(source.consume(0).expect("empty read"), Vec::<u8>::new());
}

#[test]
fn test_empty_source() {
    let mut source = EmptySource;
    assert_eq!(source.size(), Some(0));
    assert_eq!(source.consume(0).expect("empty read"), Vec::<u8>::new());
    assert!(matches!(source.consume(1), Err(SourceError::Consume { got: 0, .. })));
    assert!(matches!(source.store(&[1]), Err(SourceError::ReadOnly)));

    let mut tree = Tree::new(shared(EmptySource));
    let err = tree.load_new(Type::u8(), "byte", 0).expect_err("no bytes");
    assert!(err.is_consume());
    let none = tree
        .load_new(Type::block(0), "nothing", 0)
        .expect("zero-length load");
    assert_eq!(tree.atom(none).size(), 0);
}

#[test]
fn test_file_source_read_only_and_read_write() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&[0x10, 0x20, 0x30, 0x40]).expect("write");
    file.flush().expect("flush");

    let mut reader = FileSource::open(file.path()).expect("open");
    assert_eq!(reader.size(), Some(4));
    reader.seek(2).expect("seek");
    assert_eq!(reader.consume(2).expect("consume"), vec![0x30, 0x40]);
    assert!(matches!(reader.store(&[0]), Err(SourceError::ReadOnly)));

    reader.seek(3).expect("seek");
    assert!(matches!(
        reader.consume(2),
        Err(SourceError::Consume { got: 1, .. })
    ));

    let mut writer = FileSource::open_rw(file.path()).expect("open rw");
    writer.seek(1).expect("seek");
    writer.store(&[0xff]).expect("store");
    let bytes = std::fs::read(file.path()).expect("read back");
    assert_eq!(bytes, vec![0x10, 0xff, 0x30, 0x40]);
}

#[test]
fn test_proxy_source_is_a_window() {
    let parent = shared(BytesSource::new(vec![0, 1, 2, 3, 4, 5, 6, 7]));
    let mut proxy = ProxySource::new(parent.clone(), 2, 4);
    assert_eq!(proxy.size(), Some(4));
    assert_eq!(proxy.base(), 2);
    assert_eq!(proxy.consume(3).expect("consume"), vec![2, 3, 4]);
    assert!(matches!(
        proxy.consume(2),
        Err(SourceError::Consume {
            offset: 3,
            desired: 2,
            got: 1
        })
    ));
    assert!(matches!(proxy.seek(5), Err(SourceError::OutOfBounds { .. })));

    proxy.seek(0).expect("seek");
    proxy.store(&[0xaa, 0xbb]).expect("store");
    assert!(matches!(proxy.store(&[0; 3]), Err(SourceError::Store { .. })));

    let mut tree = Tree::new(parent);
    let root = tree.load_new(Type::u16le(), "word", 2).expect("load");
    assert_eq!(tree.atom(root).uint().expect("int"), 0xbbaa);
}

#[test]
fn test_tree_over_proxy_uses_window_offsets() {
    let parent = shared(BytesSource::new(vec![0xff, 0xff, 0x34, 0x12, 0xff]));
    let mut tree = Tree::new(shared(ProxySource::new(parent, 2, 2)));
    let root = tree.load_new(Type::u16le(), "word", 0).expect("load");
    assert_eq!(tree.atom(root).uint().expect("int"), 0x1234);
    assert!(tree.load_new(Type::u32le(), "wide", 0).expect_err("past window").is_consume());
}

#[test]
fn test_file_source_rejects_reads_past_its_length_before_reading() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&0x7fff_ffff_ffff_ffffu64.to_le_bytes()).expect("write");
    file.flush().expect("flush");

    let mut reader = FileSource::open(file.path()).expect("open");
    reader.seek(8).expect("seek");
    assert!(matches!(
        reader.consume(u64::MAX / 2),
        Err(SourceError::Consume { got: 0, .. })
    ));

    let blob = Type::record("blob")
        .field("n", Type::u64le())
        .dynamic("body", |s| Ok(Type::block(s.uint("n")?)))
        .build()
        .expect("valid record");
    let source = FileSource::open(file.path()).expect("open");
    let mut tree = Tree::new(shared(source));
    let err = tree.load_new(blob, "blob", 0).expect_err("body is not there");
    assert!(matches!(
        err,
        Error::Consume {
            desired: 0x7fff_ffff_ffff_ffff,
            got: 0,
            ..
        }
    ));
}

#[cfg(target_os = "linux")]
#[test]
fn test_process_memory_rejects_reads_past_the_address_space() {
    use binform::source::ProcessMemorySource;

    static MARKER: [u8; 4] = *b"bfmk";
    let mut memory = ProcessMemorySource::open(std::process::id()).expect("open");
    let address = MARKER.as_ptr() as u64;
    memory.seek(address).expect("seek");
    assert_eq!(memory.consume(4).expect("consume"), b"bfmk".to_vec());

    memory.seek(address).expect("seek");
    assert!(matches!(
        memory.consume(u64::MAX),
        Err(SourceError::Consume { got: 0, .. })
    ));
}
