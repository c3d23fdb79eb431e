use core::num::Wrapping;

/// Computes the Internet checksum (RFC 1071) of `bytes`.
///
/// An odd trailing byte is padded with zero. Summing a range that already
/// contains its own checksum yields zero.
#[must_use]
pub fn checksum16(bytes: &[u8]) -> u16 {
    let mut sum = bytes
        .chunks(2)
        .map(|chunk| match chunk {
            [a, b] => u16::from_be_bytes([*a, *b]),
            [a] => u16::from_be_bytes([*a, 0]),
            _ => 0,
        })
        .map(|n| Wrapping(u32::from(n)))
        .sum::<Wrapping<u32>>()
        .0;

    sum = (sum & 0xffff) + (sum >> 16);
    sum += sum >> 16;

    !plasma_regs::low_half(sum)
}
