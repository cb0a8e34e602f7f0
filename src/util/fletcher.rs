/// Fletcher-16 checksum, seeded with `0xff` for both sums.
///
/// Reduction modulo 255 is deferred: bytes are summed in batches of 20 and folded with
///  `(s & 0xff) + (s >> 8)` after each batch, plus once more at the end. The result is
///  the same as reducing after every byte, with `0` represented as `0xff`.
pub fn fletcher16(data: &[u8]) -> u16 {
    let mut sum1: u32 = 0xff;
    let mut sum2: u32 = 0xff;

    for batch in data.chunks(20) {
        for &b in batch {
            sum1 += b as u32;
            sum2 += sum1;
        }
        sum1 = fold(sum1);
        sum2 = fold(sum2);
    }

    sum1 = fold(sum1);
    sum2 = fold(sum2);

    ((sum2 << 8) | sum1) as u16
}

#[inline]
fn fold(sum: u32) -> u32 {
    (sum & 0xff) + (sum >> 8)
}
