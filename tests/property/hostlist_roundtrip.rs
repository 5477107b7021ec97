use latticed::core::hostlist::{compress, expand};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn name_strategy() -> impl Strategy<Value = String> {
    // Realistic node names: a short alpha prefix and a fixed-width
    // decimal suffix.
    ("[a-z]{1,4}", 1usize..=3, 0u32..=999).prop_map(|(prefix, width, number)| {
        let number = number % 10u32.pow(width as u32);
        format!("{prefix}{number:0width$}")
    })
}

proptest! {
    /// compress -> expand preserves the set of names exactly.
    #[test]
    fn compress_expand_preserves_sets(names in prop::collection::btree_set(name_strategy(), 1..60)) {
        let names: Vec<String> = names.into_iter().collect();
        let compressed = compress(&names);
        let expanded = expand(&compressed).unwrap();
        let before: BTreeSet<&String> = names.iter().collect();
        let after: BTreeSet<&String> = expanded.iter().collect();
        prop_assert_eq!(before, after, "through '{}'", compressed);
    }

    /// Compression is idempotent: re-expanding and re-compressing gives
    /// the same canonical expression.
    #[test]
    fn compress_is_canonical(names in prop::collection::btree_set(name_strategy(), 1..40)) {
        let names: Vec<String> = names.into_iter().collect();
        let once = compress(&names);
        let twice = compress(&expand(&once).unwrap());
        prop_assert_eq!(once, twice);
    }

    /// Expansion of a synthesized range matches the naive enumeration.
    #[test]
    fn range_expansion_matches_enumeration(lo in 0u64..500, len in 1u64..50, width in 1usize..4) {
        let hi = lo + len - 1;
        let expr = format!("n[{lo:0width$}-{hi:0width$}]");
        let expanded = expand(&expr).unwrap();
        prop_assert_eq!(expanded.len() as u64, len);
        for (offset, name) in expanded.iter().enumerate() {
            let value = lo + offset as u64;
            prop_assert_eq!(name.as_str(), format!("n{value:0width$}"));
        }
    }
}
