// src/core/hostlist.rs

//! Node-name expansion and compression.
//!
//! Node sets travel in two textual forms: the ranged form
//! `prefix[001-004,007]` used everywhere a node list is configured or
//! reported, and the d-dimensional rectangle form `prefix[000x133]` used by
//! the topology allocator, where each digit position is an axis coordinate
//! in base 36. This module converts both forms to and from explicit name
//! lists, and provides the name hash used for O(1) node lookup.

use crate::core::LatticeError;

/// Default base for the name hash, tuned for decimal-suffixed node names.
pub const DEFAULT_HASH_BASE: u32 = 10;

/// Expands a hostlist expression into individual node names.
///
/// Accepts comma-separated entries, each either a plain name, a ranged
/// expression `prefix[lo-hi,n,...]` (zero padding is preserved), or a
/// rectangle expression `prefix[cccxCCC]`.
pub fn expand(expr: &str) -> Result<Vec<String>, LatticeError> {
    let mut names = Vec::new();
    for entry in split_entries(expr)? {
        expand_entry(&entry, &mut names)?;
    }
    Ok(names)
}

/// Compresses a list of node names into the canonical ranged form.
///
/// Names sharing a prefix and suffix width are folded into one bracket
/// group with sorted, deduplicated ranges; names without a numeric suffix
/// are emitted verbatim. `expand(compress(x))` preserves the set.
pub fn compress(names: &[String]) -> String {
    // Group by (prefix, suffix width), preserving first-seen order of groups.
    let mut groups: Vec<(String, usize, Vec<u64>)> = Vec::new();
    let mut plain: Vec<String> = Vec::new();

    for name in names {
        match split_numeric_suffix(name) {
            Some((prefix, digits)) => {
                let width = digits.len();
                let value: u64 = digits.parse().unwrap_or(0);
                if let Some(g) = groups
                    .iter_mut()
                    .find(|(p, w, _)| p == prefix && *w == width)
                {
                    g.2.push(value);
                } else {
                    groups.push((prefix.to_string(), width, vec![value]));
                }
            }
            None => plain.push(name.clone()),
        }
    }

    let mut parts: Vec<String> = plain;
    for (prefix, width, mut values) in groups {
        values.sort_unstable();
        values.dedup();
        let mut ranges: Vec<String> = Vec::new();
        let mut i = 0;
        while i < values.len() {
            let lo = values[i];
            let mut hi = lo;
            while i + 1 < values.len() && values[i + 1] == hi + 1 {
                hi = values[i + 1];
                i += 1;
            }
            if lo == hi {
                ranges.push(format!("{lo:0width$}"));
            } else {
                ranges.push(format!("{lo:0width$}-{hi:0width$}"));
            }
            i += 1;
        }
        parts.push(format!("{prefix}[{}]", ranges.join(",")));
    }
    parts.join(",")
}

/// Splits a hostlist expression into entries at commas outside brackets.
fn split_entries(expr: &str) -> Result<Vec<String>, LatticeError> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in expr.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    LatticeError::ParseFailure(format!("unbalanced ']' in hostlist '{expr}'"))
                })?;
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    entries.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(LatticeError::ParseFailure(format!(
            "unbalanced '[' in hostlist '{expr}'"
        )));
    }
    if !current.trim().is_empty() {
        entries.push(current.trim().to_string());
    }
    Ok(entries)
}

fn expand_entry(entry: &str, out: &mut Vec<String>) -> Result<(), LatticeError> {
    let Some(open) = entry.find('[') else {
        out.push(entry.to_string());
        return Ok(());
    };
    let close = entry.rfind(']').ok_or_else(|| {
        LatticeError::ParseFailure(format!("missing ']' in hostlist entry '{entry}'"))
    })?;
    let prefix = &entry[..open];
    let body = &entry[open + 1..close];

    for part in body.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(x) = find_rect_separator(part) {
            expand_rect(prefix, &part[..x], &part[x + 1..], out)?;
        } else if let Some(dash) = part.find('-') {
            let (lo_s, hi_s) = (&part[..dash], &part[dash + 1..]);
            let width = lo_s.len();
            let lo: u64 = lo_s.parse().map_err(|_| {
                LatticeError::ParseFailure(format!("bad range start '{lo_s}' in '{entry}'"))
            })?;
            let hi: u64 = hi_s.parse().map_err(|_| {
                LatticeError::ParseFailure(format!("bad range end '{hi_s}' in '{entry}'"))
            })?;
            if hi < lo {
                return Err(LatticeError::ParseFailure(format!(
                    "inverted range {lo}-{hi} in '{entry}'"
                )));
            }
            for v in lo..=hi {
                out.push(format!("{prefix}{v:0width$}"));
            }
        } else {
            let width = part.len();
            let v: u64 = part.parse().map_err(|_| {
                LatticeError::ParseFailure(format!("bad index '{part}' in '{entry}'"))
            })?;
            out.push(format!("{prefix}{v:0width$}"));
        }
    }
    Ok(())
}

/// Locates the `x` separating the two corners of a rectangle expression.
/// Only recognized when both sides are equal-length base-36 coordinate
/// strings, so ranged bodies containing hex-free decimals are unaffected.
fn find_rect_separator(part: &str) -> Option<usize> {
    let x = part.find('x')?;
    let (lo, hi) = (&part[..x], &part[x + 1..]);
    if lo.is_empty() || lo.len() != hi.len() {
        return None;
    }
    let coord = |s: &str| s.chars().all(|c| c.is_ascii_alphanumeric() && c != 'x');
    (coord(lo) && coord(hi)).then_some(x)
}

/// Expands a rectangle `prefix[lo x hi]` where each character position is
/// one axis coordinate in base 36, enumerating every name in the box.
fn expand_rect(
    prefix: &str,
    lo: &str,
    hi: &str,
    out: &mut Vec<String>,
) -> Result<(), LatticeError> {
    let lo_c = parse_coords(lo)?;
    let hi_c = parse_coords(hi)?;
    if lo_c.iter().zip(&hi_c).any(|(a, b)| a > b) {
        return Err(LatticeError::ParseFailure(format!(
            "inverted rectangle {lo}x{hi}"
        )));
    }
    let dims = lo_c.len();
    let mut cursor = lo_c.clone();
    loop {
        let name: String = cursor
            .iter()
            .map(|&c| char::from_digit(c, 36).unwrap_or('0'))
            .collect();
        out.push(format!("{prefix}{name}"));

        // Odometer increment, last axis fastest.
        let mut axis = dims;
        loop {
            if axis == 0 {
                return Ok(());
            }
            axis -= 1;
            if cursor[axis] < hi_c[axis] {
                cursor[axis] += 1;
                // Trailing axes wrap back to the low corner.
                cursor[axis + 1..].copy_from_slice(&lo_c[axis + 1..]);
                break;
            }
        }
    }
}

fn parse_coords(s: &str) -> Result<Vec<u32>, LatticeError> {
    s.chars()
        .map(|c| {
            c.to_digit(36)
                .ok_or_else(|| LatticeError::ParseFailure(format!("bad coordinate '{c}' in '{s}'")))
        })
        .collect()
}

/// Splits a trailing decimal suffix off a node name, returning
/// `(prefix, digits)` when present.
fn split_numeric_suffix(name: &str) -> Option<(&str, &str)> {
    let first_digit = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()?
        .0;
    if first_digit == name.len() {
        return None;
    }
    Some((&name[..first_digit], &name[first_digit..]))
}

/// Hashes a node name with the given base, folding trailing digits so that
/// decimal-suffixed names spread evenly.
pub fn hash_name(name: &str, base: u32) -> u64 {
    let base = u64::from(base.max(2));
    let mut hash: u64 = 0;
    for c in name.chars() {
        if let Some(d) = c.to_digit(10) {
            hash = hash.wrapping_mul(base).wrapping_add(u64::from(d));
        } else {
            hash = hash.wrapping_mul(127).wrapping_add(c as u64);
        }
    }
    hash
}

/// Open-addressed name-to-index table sized at twice the node count, giving
/// O(1) expected lookup for the node table.
#[derive(Debug, Clone)]
pub struct NameIndex {
    base: u32,
    slots: Vec<Option<(String, usize)>>,
}

impl NameIndex {
    pub fn build(names: &[String], base: u32) -> Self {
        let cap = (names.len() * 2).max(8);
        let mut idx = Self {
            base,
            slots: vec![None; cap],
        };
        for (i, name) in names.iter().enumerate() {
            idx.insert(name, i);
        }
        idx
    }

    fn insert(&mut self, name: &str, index: usize) {
        let cap = self.slots.len();
        let mut slot = (hash_name(name, self.base) as usize) % cap;
        for _ in 0..cap {
            match &self.slots[slot] {
                None => {
                    self.slots[slot] = Some((name.to_string(), index));
                    return;
                }
                Some((existing, _)) if existing == name => {
                    self.slots[slot] = Some((name.to_string(), index));
                    return;
                }
                Some(_) => slot = (slot + 1) % cap,
            }
        }
        unreachable!("name index table full; sized at 2x node count");
    }

    /// Looks up the dense index for a node name.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        let cap = self.slots.len();
        let mut slot = (hash_name(name, self.base) as usize) % cap;
        for _ in 0..cap {
            match &self.slots[slot] {
                None => return None,
                Some((existing, index)) if existing == name => return Some(*index),
                Some(_) => slot = (slot + 1) % cap,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_ranged() {
        let names = expand("lx[00-03,07]").unwrap();
        assert_eq!(names, vec!["lx00", "lx01", "lx02", "lx03", "lx07"]);
    }

    #[test]
    fn expand_mixed_entries() {
        let names = expand("login,lx[1-2],gpu3").unwrap();
        assert_eq!(names, vec!["login", "lx1", "lx2", "gpu3"]);
    }

    #[test]
    fn compress_canonical() {
        let names: Vec<String> = ["lx00", "lx01", "lx02", "lx03", "lx07"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(compress(&names), "lx[00-03,07]");
    }

    #[test]
    fn roundtrip() {
        let expr = "tux[000-004,010]";
        let names = expand(expr).unwrap();
        assert_eq!(compress(&names), expr);
    }

    #[test]
    fn expand_rectangle() {
        let names = expand("bg[000x011]").unwrap();
        assert_eq!(names, vec!["bg000", "bg001", "bg010", "bg011"]);
    }

    #[test]
    fn name_index_lookup() {
        let names: Vec<String> = (0..50).map(|i| format!("n{i:03}")).collect();
        let idx = NameIndex::build(&names, DEFAULT_HASH_BASE);
        assert_eq!(idx.lookup("n007"), Some(7));
        assert_eq!(idx.lookup("n049"), Some(49));
        assert_eq!(idx.lookup("unknown"), None);
    }
}
