//! Version string comparison.
//!
//! Implements the segment-wise comparison used by RPM (and, with an epoch
//! prefix, by pacman): alternating runs of digits and letters are compared
//! pairwise, numeric runs beat alphabetic runs, `~` sorts before anything
//! (pre-releases) and `^` sorts after the base version but before any
//! further segment.

use std::cmp::Ordering;

/// Compares two version (or release) strings.
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    let is_sep = |c: u8| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^';

    while i < one.len() || j < two.len() {
        while i < one.len() && is_sep(one[i]) {
            i += 1;
        }
        while j < two.len() && is_sep(two[j]) {
            j += 1;
        }

        let c1 = one.get(i).copied();
        let c2 = two.get(j).copied();

        // tilde sorts before everything, including the end of the string
        if c1 == Some(b'~') || c2 == Some(b'~') {
            if c1 != Some(b'~') {
                return Ordering::Greater;
            }
            if c2 != Some(b'~') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        // caret sorts after the end of the string but before anything else
        if c1 == Some(b'^') || c2 == Some(b'^') {
            if c1.is_none() {
                return Ordering::Less;
            }
            if c2.is_none() {
                return Ordering::Greater;
            }
            if c1 != Some(b'^') {
                return Ordering::Greater;
            }
            if c2 != Some(b'^') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        let (Some(first), Some(_)) = (c1, c2) else {
            break;
        };

        let numeric = first.is_ascii_digit();
        let take = |s: &[u8], mut k: usize| {
            let start = k;
            while k < s.len()
                && (if numeric {
                    s[k].is_ascii_digit()
                } else {
                    s[k].is_ascii_alphabetic()
                })
            {
                k += 1;
            }
            (start, k)
        };
        let (s1, e1) = take(one, i);
        let (s2, e2) = take(two, j);
        i = e1;
        j = e2;

        // segments of different types: numeric is newer
        if s2 == e2 {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut seg1 = &one[s1..e1];
        let mut seg2 = &two[s2..e2];
        if numeric {
            while seg1.first() == Some(&b'0') {
                seg1 = &seg1[1..];
            }
            while seg2.first() == Some(&b'0') {
                seg2 = &seg2[1..];
            }
            match seg1.len().cmp(&seg2.len()) {
                Ordering::Equal => {}
                other => return other,
            }
        }

        match seg1.cmp(seg2) {
            Ordering::Equal => {}
            other => return other,
        }
    }

    let rest1 = i < one.len();
    let rest2 = j < two.len();
    match (rest1, rest2) {
        (false, false) => Ordering::Equal,
        (true, _) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}

/// Compares `(epoch, version, release)` triples.
pub fn evr_cmp(a: (u32, &str, &str), b: (u32, &str, &str)) -> Ordering {
    a.0.cmp(&b.0)
        .then_with(|| vercmp(a.1, b.1))
        .then_with(|| vercmp(a.2, b.2))
}

/// Splits `[epoch:]version[-release]`. Missing parts come back empty/zero.
pub fn split_evr(evr: &str) -> (u32, &str, &str) {
    let (epoch, rest) = match evr.split_once(':') {
        Some((e, rest)) if !e.is_empty() && e.bytes().all(|c| c.is_ascii_digit()) => {
            (e.parse().unwrap_or(0), rest)
        }
        _ => (0, evr),
    };
    match rest.rsplit_once('-') {
        Some((version, release)) => (epoch, version, release),
        None => (epoch, rest, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_segments() {
        assert_eq!(vercmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(vercmp("1.0", "2.0"), Ordering::Less);
        assert_eq!(vercmp("2.10", "2.9"), Ordering::Greater);
        assert_eq!(vercmp("1.01", "1.1"), Ordering::Equal);
        assert_eq!(vercmp("1.0.1", "1.0"), Ordering::Greater);
    }

    #[test]
    fn test_alpha_and_numeric() {
        assert_eq!(vercmp("1.0a", "1.0"), Ordering::Greater);
        assert_eq!(vercmp("1.a", "1.1"), Ordering::Less);
        assert_eq!(vercmp("fc21", "fc20"), Ordering::Greater);
    }

    #[test]
    fn test_tilde_and_caret() {
        assert_eq!(vercmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(vercmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(vercmp("1.0^git1", "1.0"), Ordering::Greater);
        assert_eq!(vercmp("1.0^git1", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_antisymmetric() {
        let versions = ["1.0", "1.0a", "1.0~b", "2", "1.10", "1.9", "1.0^x"];
        for a in versions {
            for b in versions {
                assert_eq!(vercmp(a, b), vercmp(b, a).reverse(), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_evr() {
        assert_eq!(split_evr("1:2.0-3"), (1, "2.0", "3"));
        assert_eq!(split_evr("2.0-3"), (0, "2.0", "3"));
        assert_eq!(split_evr("2.0"), (0, "2.0", ""));
        assert_eq!(
            evr_cmp((1, "1.0", "1"), (0, "9.0", "1")),
            Ordering::Greater
        );
        assert_eq!(evr_cmp((0, "1.0", "2"), (0, "1.0", "10")), Ordering::Less);
    }
}
