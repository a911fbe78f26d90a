//! Running-sum decoding of the packed PBF columns.
//!
//! Ids, coordinates, way refs, member ids and most dense metadata fields are
//! stored as differences from the previous entry. Overflow wraps, matching
//! reference encoders that compute deltas with wrapping arithmetic.

/// Decodes `input` into `output` starting from `last`. Returns the final
/// running value so decoding can continue across slices.
#[inline]
pub(crate) fn delta_decode_i64(input: &[i64], output: &mut Vec<i64>, mut last: i64) -> i64 {
    output.reserve(input.len());
    for &delta in input {
        last = last.wrapping_add(delta);
        output.push(last);
    }
    last
}

/// Decodes an entire column from zero.
#[inline]
pub(crate) fn delta_decoded(input: &[i64]) -> Vec<i64> {
    let mut output = Vec::with_capacity(input.len());
    delta_decode_i64(input, &mut output, 0);
    output
}

/// Incremental decoder for columns read one entry at a time.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DeltaCursor {
    last: i64,
}

impl DeltaCursor {
    #[inline]
    pub(crate) fn advance(&mut self, delta: i64) -> i64 {
        self.last = self.last.wrapping_add(delta);
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_running_sum() {
        assert_eq!(delta_decoded(&[50253600, 2, 6]), [50253600, 50253602, 50253608]);
        assert_eq!(delta_decoded(&[]), Vec::<i64>::new());
        assert_eq!(delta_decoded(&[-5, 3, -1]), [-5, -2, -3]);
    }

    #[test]
    fn test_continues_from_previous_slice() {
        let mut output = Vec::new();
        let last = delta_decode_i64(&[10, 1], &mut output, 0);
        let last = delta_decode_i64(&[1, 1], &mut output, last);
        assert_eq!(last, 13);
        assert_eq!(output, [10, 11, 12, 13]);
    }

    #[test]
    fn test_cursor_matches_column_decode() {
        let deltas = [7, -2, 40, 0, -45];
        let mut cursor = DeltaCursor::default();
        let stepped: Vec<i64> = deltas.iter().map(|&d| cursor.advance(d)).collect();
        assert_eq!(stepped, delta_decoded(&deltas));
    }
}
