use ccflash::{error::VerifyError, flasher::checksum_crc32, Flasher, Segment};
use pretty_assertions::assert_eq;

mod common;

use common::{pattern, Call, FakeDevice};

/// A fake device whose flash already holds `segments`
fn flashed(segments: &[Segment<'_>]) -> FakeDevice {
    let mut device = FakeDevice::new();
    for segment in segments {
        for (offset, byte) in segment.data.iter().enumerate() {
            device.flash.insert(segment.addr + offset as u32, *byte);
        }
    }

    device
}

#[test]
fn matching_contents_verify() {
    let data = [0x00, 0x01, 0x02, 0x03];
    let segments = vec![Segment::new(0x0, &data)];
    let mut device = flashed(&segments);

    let ok = Flasher::new(&mut device).verify(segments, 0).unwrap();

    assert!(ok);
    assert_eq!(
        device.calls,
        vec![Call::Crc32 {
            addr: 0,
            size: 4,
            repeat: 0
        }]
    );
    assert_eq!(checksum_crc32(&data, 0), crc32fast::hash(&data));
}

#[test]
fn flipped_byte_fails_and_stops() {
    let first = pattern(64);
    let second = pattern(64);
    let segments = vec![Segment::new(0x0, &first), Segment::new(0x1000, &second)];
    let mut device = flashed(&segments);
    device.corrupt(0x10);

    let ok = Flasher::new(&mut device).verify(segments, 0).unwrap();

    assert!(!ok);
    assert_eq!(device.calls.len(), 1);
}

#[test]
fn segments_past_flash_area_are_not_checked() {
    let flash = pattern(16);
    let ram = pattern(16);
    let segments = vec![
        Segment::new(0x2000_0000, &ram),
        Segment::new(0x0000_2000, &flash),
    ];
    let mut device = flashed(&segments[1..]);

    let ok = Flasher::new(&mut device).verify(segments, 0).unwrap();

    assert!(ok);
    assert_eq!(
        device.calls,
        vec![Call::Crc32 {
            addr: 0x2000,
            size: 16,
            repeat: 0
        }]
    );
}

#[test]
fn no_segments_verify() {
    let mut device = FakeDevice::new();

    assert!(Flasher::new(&mut device).verify(Vec::new(), 0).unwrap());
    assert!(device.calls.is_empty());
}

#[test]
fn repeated_reads_compare_concatenated_copies() {
    let data = pattern(100);
    let segments = vec![Segment::new(0x400, &data)];
    let mut device = flashed(&segments);

    let ok = Flasher::new(&mut device).verify(segments, 3).unwrap();

    assert!(ok);
    assert_eq!(
        device.calls,
        vec![Call::Crc32 {
            addr: 0x400,
            size: 100,
            repeat: 3
        }]
    );
}

#[test]
fn comm_failure_is_an_error() {
    let data = pattern(8);
    let segments = vec![Segment::new(0, &data)];
    let mut device = FakeDevice {
        fail_crc32: true,
        ..flashed(&segments)
    };

    let err = Flasher::new(&mut device).verify(segments, 0).unwrap_err();

    assert!(matches!(err, VerifyError::CommFailure(_)));
}

#[test]
fn verify_after_flash() {
    let first = pattern(700);
    let second = pattern(10);
    let segments = vec![Segment::new(0x0, &first), Segment::new(0x8000, &second)];
    let mut device = FakeDevice::new();
    let mut flasher = Flasher::new(&mut device);

    flasher
        .flash(segments.clone(), &mut ccflash::flasher::DefaultProgressCallback)
        .unwrap();

    assert!(flasher.verify(segments, 0).unwrap());
}
