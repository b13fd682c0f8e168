//! Binary launcher templates.
//!
//! A template launcher embeds a well-known placeholder where the path of the
//! program it should start belongs. Synthesizing a shim means finding that
//! placeholder and writing the real path over it.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Longest target path a launcher template can hold.
pub const MAX_TARGET_PATH_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("target path is {len} bytes long; launcher templates hold at most {max}")]
    NameTooLong { len: usize, max: usize },
    #[error("placeholder not found in launcher template")]
    PlaceholderNotFound,
    #[error("launcher template too small: {needed} bytes needed after offset {offset}, {available} available")]
    TemplateTooSmall {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// The placeholder baked into launcher templates: the lowercase hex SHA-256
/// of `foobar`.
pub fn placeholder() -> Vec<u8> {
    hex::encode(Sha256::digest(b"foobar")).into_bytes()
}

/// Returns a copy of `template` with the first occurrence of `placeholder`
/// overwritten by `replacement`.
///
/// A replacement shorter than the placeholder leaves the rest of the
/// placeholder zeroed. The replacement may run past the placeholder into the
/// reserved area behind it, up to [`MAX_TARGET_PATH_LEN`] bytes.
pub fn locate_and_replace(
    template: &[u8],
    placeholder: &[u8],
    replacement: &[u8],
) -> Result<Vec<u8>, PatchError> {
    if replacement.len() > MAX_TARGET_PATH_LEN {
        return Err(PatchError::NameTooLong {
            len: replacement.len(),
            max: MAX_TARGET_PATH_LEN,
        });
    }
    let offset = find(template, placeholder).ok_or(PatchError::PlaceholderNotFound)?;
    let span = replacement.len().max(placeholder.len());
    if offset + span > template.len() {
        return Err(PatchError::TemplateTooSmall {
            offset,
            needed: span,
            available: template.len() - offset,
        });
    }

    let mut patched = template.to_vec();
    patched[offset..offset + replacement.len()].copy_from_slice(replacement);
    if replacement.len() < placeholder.len() {
        patched[offset + replacement.len()..offset + placeholder.len()].fill(0);
    }
    Ok(patched)
}

/// Knuth-Morris-Pratt search for the first occurrence of `needle`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    let failure = failure_table(needle);
    let mut matched = 0;
    for (i, &byte) in haystack.iter().enumerate() {
        while matched > 0 && needle[matched] != byte {
            matched = failure[matched - 1];
        }
        if needle[matched] == byte {
            matched += 1;
        }
        if matched == needle.len() {
            return Some(i + 1 - needle.len());
        }
    }
    None
}

/// `table[i]` is the length of the longest proper prefix of
/// `pattern[..=i]` that is also a suffix of it.
fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0; pattern.len()];
    let mut len = 0;
    for i in 1..pattern.len() {
        while len > 0 && pattern[i] != pattern[len] {
            len = table[len - 1];
        }
        if pattern[i] == pattern[len] {
            len += 1;
        }
        table[i] = len;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_with_placeholder(reserved: usize) -> Vec<u8> {
        let mut template = b"MZ\x90\x00header".to_vec();
        template.extend_from_slice(&placeholder());
        template.resize(template.len() + reserved, 0);
        template.extend_from_slice(b"trailer");
        template
    }

    #[test]
    fn placeholder_is_sha256_of_foobar() {
        assert_eq!(
            placeholder(),
            b"c3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2".to_vec()
        );
    }

    #[test]
    fn find_handles_overlapping_prefixes() {
        assert_eq!(find(b"aaaaab", b"aaab"), Some(2));
        assert_eq!(find(b"abababca", b"ababca"), Some(2));
        assert_eq!(find(b"abc", b"abd"), None);
        assert_eq!(find(b"ab", b"abc"), None);
        assert_eq!(find(b"abc", b""), Some(0));
    }

    #[test]
    fn shorter_replacement_zero_fills() {
        let template = template_with_placeholder(0);
        let patched = locate_and_replace(&template, &placeholder(), b"/opt/tools/t-rex").unwrap();
        let offset = find(&template, &placeholder()).unwrap();

        assert_eq!(patched.len(), template.len());
        assert_eq!(&patched[offset..offset + 16], b"/opt/tools/t-rex");
        assert!(patched[offset + 16..offset + 64].iter().all(|&b| b == 0));
        assert!(patched.ends_with(b"trailer"));
        assert!(patched.starts_with(b"MZ\x90\x00header"));
    }

    #[test]
    fn longer_replacement_uses_reserved_area() {
        let template = template_with_placeholder(1024);
        let path = vec![b'x'; 200];
        let patched = locate_and_replace(&template, &placeholder(), &path).unwrap();
        let offset = find(&template, &placeholder()).unwrap();
        assert_eq!(&patched[offset..offset + 200], path.as_slice());
        assert!(patched.ends_with(b"trailer"));
    }

    #[test]
    fn rejects_paths_over_limit() {
        let template = template_with_placeholder(2048);
        let path = vec![b'x'; MAX_TARGET_PATH_LEN + 1];
        assert_eq!(
            locate_and_replace(&template, &placeholder(), &path),
            Err(PatchError::NameTooLong {
                len: MAX_TARGET_PATH_LEN + 1,
                max: MAX_TARGET_PATH_LEN
            })
        );
    }

    #[test]
    fn missing_placeholder_fails() {
        assert_eq!(
            locate_and_replace(b"no placeholder here", &placeholder(), b"/x"),
            Err(PatchError::PlaceholderNotFound)
        );
    }

    #[test]
    fn replacement_past_end_of_template_fails() {
        let mut template = b"head".to_vec();
        template.extend_from_slice(&placeholder());
        let path = vec![b'x'; 100];
        assert!(matches!(
            locate_and_replace(&template, &placeholder(), &path),
            Err(PatchError::TemplateTooSmall { .. })
        ));
    }
}
