//! Property-based tests for the checksum engine

use bmcfw_checksum::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_crc16_forms_agree(data in prop::collection::vec(any::<u8>(), 0..512)) {
        prop_assert_eq!(crc16(&data), crc16_table(&data));
    }

    #[test]
    fn prop_crc8_is_resumable(
        data in prop::collection::vec(any::<u8>(), 0..256),
        split in any::<prop::sample::Index>(),
    ) {
        let at = split.index(data.len() + 1);
        let (head, tail) = data.split_at(at);
        prop_assert_eq!(crc8(tail, crc8(head, 0)), crc8(&data, 0));
    }

    #[test]
    fn prop_ifx_words_equal_le_bytes(words in prop::collection::vec(any::<u32>(), 0..64)) {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        prop_assert_eq!(crc32_ifx_words(&words), crc32_ifx(&bytes));
    }

    #[test]
    fn prop_additive_checksum_is_linear(
        a in prop::collection::vec(any::<u8>(), 0..512),
        b in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut joined = a.clone();
        joined.extend_from_slice(&b);
        prop_assert_eq!(
            additive_checksum(&joined),
            additive_checksum(&a).wrapping_add(additive_checksum(&b))
        );
    }

    #[test]
    fn prop_crc32_detects_single_bit_flip(
        data in prop::collection::vec(any::<u8>(), 1..256),
        pos in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut flipped = data.clone();
        let i = pos.index(flipped.len());
        if let Some(b) = flipped.get_mut(i) {
            *b ^= 1 << bit;
        }
        prop_assert_ne!(crc32(&data), crc32(&flipped));
    }

    #[test]
    fn prop_jedec_checksum_ignores_blank_rows(
        words in prop::collection::vec(any::<u32>(), 0..64),
        blank in 0usize..16,
    ) {
        let mut padded = words.clone();
        padded.extend(std::iter::repeat_n(0u32, blank * 4));
        prop_assert_eq!(jedec_fuse_checksum(&padded), jedec_fuse_checksum(&words));
    }
}
