//! Bucket, object and ACL name validation.
//!
//! Valid bucket names:
//! - 3 to 63 bytes long
//! - Start with an ASCII letter
//! - Contain only ASCII letters, digits and `-`
//! - End with a letter or digit
//!
//! Valid object names are non-blank and at most 1024 bytes. A listing
//! prefix is either empty or a valid object name.

/// Longest object name accepted.
pub const MAX_OBJECT_NAME_LEN: usize = 1024;

/// The ACL applied when a caller supplies none.
pub const DEFAULT_ACL: &str = "private";

const CANNED_ACLS: &[&str] = &[
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
];

/// Returns `true` if `bucket` is a usable bucket name.
///
/// # Examples
///
/// ```
/// use s3dag_types::names::is_valid_bucket_name;
///
/// assert!(is_valid_bucket_name("photos"));
/// assert!(is_valid_bucket_name("my-bucket-2"));
/// assert!(!is_valid_bucket_name(""));
/// assert!(!is_valid_bucket_name("a.b.c"));
/// assert!(!is_valid_bucket_name("1bucket"));
/// ```
pub fn is_valid_bucket_name(bucket: &str) -> bool {
    let bytes = bucket.as_bytes();
    if bytes.len() < 3 || bytes.len() > 63 {
        return false;
    }
    if !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    if !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return false;
    }
    bytes[1..bytes.len() - 1]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// Returns `true` if `object` is a usable object name.
pub fn is_valid_object_name(object: &str) -> bool {
    if object.trim().is_empty() {
        return false;
    }
    object.len() <= MAX_OBJECT_NAME_LEN
}

/// Returns `true` if `prefix` may be used to scope a listing.
pub fn is_valid_prefix(prefix: &str) -> bool {
    prefix.is_empty() || is_valid_object_name(prefix)
}

/// Returns `true` if `acl` is a canned ACL (or blank, meaning the default).
pub fn is_valid_bucket_acl(acl: &str) -> bool {
    let acl = acl.trim();
    acl.is_empty() || CANNED_ACLS.contains(&acl)
}

/// Trim an ACL and substitute [`DEFAULT_ACL`] when it is blank.
pub fn normalize_acl(acl: &str) -> String {
    let acl = acl.trim();
    if acl.is_empty() {
        DEFAULT_ACL.to_string()
    } else {
        acl.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_length_bounds() {
        assert!(!is_valid_bucket_name("ab"));
        assert!(is_valid_bucket_name("abc"));
        assert!(is_valid_bucket_name(&"a".repeat(63)));
        assert!(!is_valid_bucket_name(&"a".repeat(64)));
    }

    #[test]
    fn bucket_rejects_blank_and_dots() {
        assert!(!is_valid_bucket_name(" "));
        assert!(!is_valid_bucket_name("   "));
        assert!(!is_valid_bucket_name("foo..bar"));
        assert!(!is_valid_bucket_name(".foo"));
        assert!(!is_valid_bucket_name("foo-"));
    }

    #[test]
    fn object_names() {
        assert!(is_valid_object_name("obj"));
        assert!(is_valid_object_name("dir/sub/obj.txt"));
        assert!(!is_valid_object_name(""));
        assert!(!is_valid_object_name("  "));
        assert!(!is_valid_object_name(&"x".repeat(MAX_OBJECT_NAME_LEN + 1)));
    }

    #[test]
    fn prefixes() {
        assert!(is_valid_prefix(""));
        assert!(is_valid_prefix("logs/"));
        assert!(!is_valid_prefix(" "));
    }

    #[test]
    fn acls() {
        assert!(is_valid_bucket_acl("private"));
        assert!(is_valid_bucket_acl("public-read-write"));
        assert!(is_valid_bucket_acl(""));
        assert!(!is_valid_bucket_acl("everyone"));
        assert_eq!(normalize_acl("  "), "private");
        assert_eq!(normalize_acl(" public-read "), "public-read");
    }

    proptest::proptest! {
        #[test]
        fn generated_bucket_names_are_valid(name in "[a-z][a-z0-9-]{1,60}[a-z0-9]") {
            proptest::prop_assert!(is_valid_bucket_name(&name));
        }

        #[test]
        fn names_with_dots_are_rejected(left in "[a-z]{2,10}", right in "[a-z]{1,10}") {
            let dotted = format!("{left}.{right}");
            proptest::prop_assert!(!is_valid_bucket_name(&dotted));
        }
    }
}
