//! Bitmap arithmetic, slicing and the shift/consume pair used by bit readers.

use binform::Bitmap;

#[test]
fn test_push_onto_zero_is_identity() {
    let b = Bitmap::new(0b1011, 4);
    assert_eq!(Bitmap::zero().push(&b), b);
    assert_eq!(b.push(&Bitmap::zero()), b);
}

#[test]
fn test_push_and_append_order() {
    let high = Bitmap::new(0b11, 2);
    let low = Bitmap::new(0b0001, 4);
    let pushed = high.push(&low);
    assert_eq!(pushed.width(), 6);
    assert_eq!(pushed.to_u64(), Some(0b110001));
    assert_eq!(low.append(&high), pushed);
}

#[test]
fn test_shift_takes_high_bits_and_consume_takes_low_bits() {
    let b = Bitmap::new(0xa5, 8);
    let (rest, taken) = b.shift(3);
    assert_eq!(taken, Bitmap::new(0b101, 3));
    assert_eq!(rest, Bitmap::new(0b00101, 5));
    assert_eq!(rest.push(&Bitmap::zero()).width(), 5);
    assert_eq!(taken.push(&rest), b);

    let (rest, taken) = b.consume(3);
    assert_eq!(taken, Bitmap::new(0b101, 3));
    assert_eq!(rest, Bitmap::new(0b10100, 5));
    assert_eq!(rest.push(&taken), b);

    let (rest, taken) = b.shift(12);
    assert_eq!(taken, b);
    assert!(rest.is_empty());
}

#[test]
fn test_signed_width_and_length() {
    let b = Bitmap::signed(-2, 5);
    assert!(b.is_signed());
    assert_eq!(b.width(), 5);
    assert_eq!(b.length(), -5);
    assert_eq!(b.to_u64(), Some(0b11110));
    assert_eq!(b.to_i128(), Some(-2));
    assert_eq!(b.clone().with_sign(false).to_i128(), Some(30));
    assert_eq!(b.to_string(), "(-2, -5)");
    assert_eq!(Bitmap::new(300, 8).to_u64(), Some(44));
}

#[test]
fn test_scan_count_and_runs() {
    let b = Bitmap::new(0b0111_0010, 8);
    assert_eq!(b.count(true), 4);
    assert_eq!(b.count(false), 4);
    assert_eq!(b.scan(true, 0), Some(1));
    assert_eq!(b.scan(true, 2), Some(4));
    assert_eq!(b.scan(false, 4), Some(7));
    assert_eq!(b.scan_reverse(true, 7), Some(6));
    assert_eq!(b.scan_reverse(true, 3), Some(1));
    assert_eq!(b.scan(true, 7), None);

    let runs = b.runs();
    let widths: Vec<u32> = runs.iter().map(Bitmap::width).collect();
    assert_eq!(widths, vec![1, 1, 2, 3, 1]);
    assert_eq!(runs[3].to_u64(), Some(0b111));
}

#[test]
fn test_get_set_grow_shrink() {
    let b = Bitmap::new(0xf0, 8);
    assert_eq!(b.get(4, 4).to_u64(), Some(0xf));
    assert_eq!(b.set(0, 0b1010, 4).to_u64(), Some(0xfa));
    assert_eq!(b.set(6, 0, 2).to_u64(), Some(0x30));
    assert_eq!(b.grow(4).width(), 12);
    assert_eq!(b.grow(4).to_u64(), Some(0xf0));
    assert_eq!(b.shrink(2), Bitmap::new(0x30, 6));
}

#[test]
fn test_reverse_and_split() {
    let b = Bitmap::new(0b1100_0001, 8);
    assert_eq!(b.reverse().to_u64(), Some(0b1000_0011));
    let parts = Bitmap::new(0xabc, 12).split(5);
    let values: Vec<(u64, u32)> = parts
        .iter()
        .map(|p| (p.to_u64().unwrap_or_default(), p.width()))
        .collect();
    assert_eq!(values, vec![(0b10101, 5), (0b01111, 5), (0b00, 2)]);
}

#[test]
fn test_wrapping_arithmetic_stays_in_width() {
    let b = Bitmap::new(250, 8);
    assert_eq!(b.wrapping_add(10).to_u64(), Some(4));
    assert_eq!(b.wrapping_sub(251).to_u64(), Some(255));
    assert_eq!(b.wrapping_mul(2).to_u64(), Some(244));
    assert_eq!(b.checked_div(0), None);
    assert_eq!(b.checked_div(7).and_then(|q| q.to_u64()), Some(35));
    assert_eq!(b.checked_rem(7).and_then(|r| r.to_u64()), Some(5));

    let s = Bitmap::signed(-128, 8);
    assert_eq!(s.wrapping_sub(1).to_i128(), Some(127));
}

#[test]
fn test_text_renderings() {
    let b = Bitmap::new(0x2d, 8);
    assert_eq!(b.binary(), "00101101");
    assert_eq!(b.hex(), "2d");
    assert_eq!(b.to_string(), "(45, 8)");
}
