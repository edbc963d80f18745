//! Rules shared by every backend that accepts multipart sessions.

use std::collections::BTreeSet;
use std::path::{Component, Path};

use md5::{Digest, Md5};
use strata_common::error::{Result, StoreError};

use crate::traits::{CompletedPart, ListOptions, ListPage};

pub const MAX_PART_NUMBER: u32 = 10_000;

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

pub fn validate_part_number(part_number: u32) -> Result<()> {
    if part_number == 0 || part_number > MAX_PART_NUMBER {
        return Err(StoreError::InvalidPart {
            part_number,
            reason: format!("part number must be between 1 and {MAX_PART_NUMBER}"),
        });
    }
    Ok(())
}

pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('\\') {
        return Err(StoreError::InvalidObjectName(key.to_string()));
    }

    let key_path = Path::new(key);
    if key_path.is_absolute() {
        return Err(StoreError::InvalidObjectName(key.to_string()));
    }

    for component in key_path.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::InvalidObjectName(key.to_string()));
            }
        }
    }

    Ok(())
}

/// Checks a completion request against the tags the store recorded for the
/// session.
pub fn check_completion<'a>(
    parts: &[CompletedPart],
    stored_tag: impl Fn(u32) -> Option<&'a str>,
) -> Result<()> {
    if parts.is_empty() {
        return Err(StoreError::InvalidArgument(
            "completion requires at least one part".to_string(),
        ));
    }

    let mut previous = 0_u32;
    for part in parts {
        validate_part_number(part.part_number)?;
        if part.part_number <= previous {
            return Err(StoreError::InvalidPart {
                part_number: part.part_number,
                reason: format!("parts out of order: {} after {previous}", part.part_number),
            });
        }
        previous = part.part_number;

        match stored_tag(part.part_number) {
            None => {
                return Err(StoreError::InvalidPart {
                    part_number: part.part_number,
                    reason: "part was never uploaded".to_string(),
                });
            }
            Some(tag) if tag != part.tag => {
                return Err(StoreError::InvalidPart {
                    part_number: part.part_number,
                    reason: format!("tag mismatch: expected {tag}, got {}", part.tag),
                });
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// S3-style multipart tag: MD5 over the binary part digests, suffixed with the
/// part count.
pub fn multipart_etag(parts: &[CompletedPart]) -> Result<String> {
    let mut hasher = Md5::new();
    for part in parts {
        let digest = hex::decode(&part.tag).map_err(|err| {
            StoreError::InternalError(format!(
                "part {} has a non-hex tag {}: {err}",
                part.part_number, part.tag
            ))
        })?;
        hasher.update(&digest);
    }
    Ok(format!("{:x}-{}", hasher.finalize(), parts.len()))
}

pub(crate) fn paginate<T>(
    mut entries: Vec<T>,
    marker: &str,
    max_keys: usize,
    key_of: impl Fn(&T) -> &str,
) -> (Vec<T>, bool, Option<String>) {
    entries.retain(|entry| marker.is_empty() || key_of(entry) > marker);
    let limit = if max_keys > 0 { max_keys } else { entries.len() };
    let is_truncated = entries.len() > limit;
    entries.truncate(limit);
    let next_marker = if is_truncated {
        entries.last().map(|entry| key_of(entry).to_string())
    } else {
        None
    };
    (entries, is_truncated, next_marker)
}

/// Pages `objects`, which must be sorted by key and already filtered by
/// prefix, then rolls keys up by delimiter.
pub(crate) fn list_page(
    objects: Vec<strata_common::ObjectDescriptor>,
    options: &ListOptions,
) -> ListPage {
    let (objects, is_truncated, next_marker) =
        paginate(objects, &options.marker, options.max_keys, |object| object.key.as_str());
    if options.delimiter.is_empty() {
        return ListPage {
            objects,
            common_prefixes: Vec::new(),
            is_truncated,
            next_marker,
        };
    }

    let mut prefixes = BTreeSet::new();
    let mut leaves = Vec::new();
    for object in objects {
        let relative = object
            .key
            .strip_prefix(options.prefix.as_str())
            .unwrap_or(&object.key);
        match relative.find(options.delimiter.as_str()) {
            Some(idx) => {
                let end = idx + options.delimiter.len();
                prefixes.insert(format!("{}{}", options.prefix, &relative[..end]));
            }
            None => leaves.push(object),
        }
    }

    ListPage {
        objects: leaves,
        common_prefixes: prefixes.into_iter().collect(),
        is_truncated,
        next_marker,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use strata_common::types::{ObjectDescriptor, PutAttributes};

    use super::{
        check_completion, list_page, md5_hex, multipart_etag, validate_object_key,
        validate_part_number,
    };
    use crate::traits::{CompletedPart, ListOptions};

    fn part(part_number: u32, tag: &str) -> CompletedPart {
        CompletedPart {
            part_number,
            tag: tag.to_string(),
        }
    }

    #[test]
    fn part_numbers_are_bounded() {
        assert!(validate_part_number(0).is_err());
        assert!(validate_part_number(1).is_ok());
        assert!(validate_part_number(10_000).is_ok());
        assert!(validate_part_number(10_001).is_err());
    }

    #[test]
    fn keys_cannot_escape_the_root() {
        assert!(validate_object_key("reports/2024/q1.csv").is_ok());
        assert!(validate_object_key("../etc/passwd").is_err());
        assert!(validate_object_key("/abs").is_err());
        assert!(validate_object_key("a\\b").is_err());
        assert!(validate_object_key("").is_err());
    }

    #[test]
    fn completion_requires_ascending_known_parts() {
        let stored: HashMap<u32, String> =
            HashMap::from([(1, md5_hex(b"a")), (2, md5_hex(b"b"))]);
        let lookup = |n: u32| stored.get(&n).map(String::as_str);

        let ok = vec![part(1, &md5_hex(b"a")), part(2, &md5_hex(b"b"))];
        assert!(check_completion(&ok, lookup).is_ok());

        let reversed = vec![part(2, &md5_hex(b"b")), part(1, &md5_hex(b"a"))];
        assert!(check_completion(&reversed, lookup).is_err());

        let unknown = vec![part(1, &md5_hex(b"a")), part(3, "ff")];
        assert!(check_completion(&unknown, lookup).is_err());

        let mismatched = vec![part(1, &md5_hex(b"zzz"))];
        assert!(check_completion(&mismatched, lookup).is_err());

        assert!(check_completion(&[], lookup).is_err());
    }

    #[test]
    fn multipart_etag_carries_part_count() {
        let parts = vec![part(1, &md5_hex(b"a")), part(2, &md5_hex(b"b"))];
        let etag = multipart_etag(&parts).unwrap();
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2);

        assert!(multipart_etag(&[part(1, "not-hex")]).is_err());
    }

    fn descriptors(keys: &[&str]) -> Vec<ObjectDescriptor> {
        keys.iter()
            .map(|key| ObjectDescriptor::new(*key, 1, md5_hex(b"v"), &PutAttributes::default(), Utc::now()))
            .collect()
    }

    #[test]
    fn delimiter_rolls_up_nested_keys() {
        let objects = descriptors(&["photos/a.jpg", "photos/2023/b.jpg", "photos/2023/c.jpg", "photos/2024/d.jpg"]);
        let page = list_page(objects, &ListOptions::with_prefix("photos/").delimiter("/"));

        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["photos/a.jpg"]);
        assert_eq!(page.common_prefixes, vec!["photos/2023/", "photos/2024/"]);
        assert!(!page.is_truncated);
    }

    #[test]
    fn no_delimiter_returns_flat_page() {
        let objects = descriptors(&["a/1", "a/2", "a/3"]);
        let page = list_page(objects, &ListOptions::default().max_keys(2));
        assert_eq!(page.objects.len(), 2);
        assert!(page.common_prefixes.is_empty());
        assert!(page.is_truncated);
        assert_eq!(page.next_marker.as_deref(), Some("a/2"));
    }
}
