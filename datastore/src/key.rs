use std::fmt;
use std::hash::{Hash, Hasher};

use super::{error, Result};
use snafu::ensure;

pub const KEY_SEPARATOR: char = '/';
// String refs are more convenient for some Rust functions
pub const KEY_SEPARATOR_STR: &str = "/";

/// A Key is a pointer into a datastore.  Key names are slash-separated paths
/// ("/a/b/c") with the slashes implying hierarchy, so "/blocks/x" and
/// "/blocks/y" live under the same mount.  The root key "/" has no segments
/// and is a prefix of every key.
#[derive(Clone, Debug)]
pub struct Key {
    name: String,
    segments: Vec<String>,
}

impl Key {
    /// Creates a Key from the given name, cleaning it into canonical form:
    /// a leading separator is implied if missing, and repeated separators
    /// collapse.  "" and "/" both give the root key.
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        let segments: Vec<String> = name
            .as_ref()
            .split(KEY_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        Self::from_segments_unchecked(segments)
    }

    /// Creates a Key from the given name segments.  Fails if any segment is
    /// empty or contains the separator; use `new` to clean a raw name.
    pub fn from_segments<S>(segments: &[S]) -> Result<Self>
    where
        S: AsRef<str>,
    {
        for segment in segments {
            let segment = segment.as_ref();
            ensure!(
                !segment.is_empty(),
                error::InvalidKeySnafu {
                    name: segments
                        .iter()
                        .map(|s| s.as_ref())
                        .collect::<Vec<_>>()
                        .join(KEY_SEPARATOR_STR),
                    msg: "empty key segment",
                }
            );
            ensure!(
                !segment.contains(KEY_SEPARATOR),
                error::InvalidKeySnafu {
                    name: segment,
                    msg: "separator inside key segment",
                }
            );
        }

        Ok(Self::from_segments_unchecked(
            segments.iter().map(|s| s.as_ref().to_string()).collect(),
        ))
    }

    fn from_segments_unchecked(segments: Vec<String>) -> Self {
        let name = if segments.is_empty() {
            KEY_SEPARATOR_STR.to_string()
        } else {
            let mut name = String::new();
            for segment in &segments {
                name.push(KEY_SEPARATOR);
                name.push_str(segment);
            }
            name
        };

        Self { name, segments }
    }

    /// Returns the root key "/".
    pub fn root() -> Self {
        Self::from_segments_unchecked(Vec::new())
    }

    /// Returns the canonical name of the key, always starting with "/".
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a list of the segments that make up the key name.  The root
    /// key has none.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns whether this key is equal to, or a descendant of, the given
    /// prefix.  The root prefix matches every key.
    pub fn starts_with(&self, prefix: &Key) -> bool {
        if self.segments.len() < prefix.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(prefix.segments.iter())
            .all(|(a, b)| a == b)
    }

    /// Removes the given prefix from the beginning of the key, returning a
    /// new Key.  If the key does not start with the prefix, the returned
    /// key is identical.  Stripping a key from itself gives the root key.
    pub fn strip_prefix(&self, prefix: &Key) -> Key {
        if !self.starts_with(prefix) {
            return self.clone();
        }

        Self::from_segments_unchecked(self.segments[prefix.segments.len()..].to_vec())
    }

    /// Prepends the given prefix to the key, returning a new Key.
    pub fn with_prefix(&self, prefix: &Key) -> Key {
        let segments: Vec<String> = prefix
            .segments
            .iter()
            .chain(self.segments.iter())
            .cloned()
            .collect();

        Self::from_segments_unchecked(segments)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// The segments are our source of truth.
impl PartialEq for Key {
    fn eq(&self, other: &Key) -> bool {
        self.segments == other.segments
    }
}
impl Eq for Key {}
impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

#[cfg(test)]
mod test {
    use super::Key;

    #[test]
    fn clean_names() {
        assert_eq!(Key::new("/a/b").name(), "/a/b");
        assert_eq!(Key::new("a/b").name(), "/a/b");
        assert_eq!(Key::new("/a//b/").name(), "/a/b");
        assert_eq!(Key::new("").name(), "/");
        assert_eq!(Key::new("/").name(), "/");
    }

    #[test]
    fn segments() {
        assert_eq!(Key::new("/a/b").segments(), &["a", "b"]);
        assert!(Key::new("/").segments().is_empty());
        assert!(Key::new("/").is_root());
    }

    #[test]
    fn from_segments() {
        let key = Key::from_segments(&["blocks", "CIQABC"]).unwrap();
        assert_eq!(key.name(), "/blocks/CIQABC");

        Key::from_segments(&["a", ""]).unwrap_err();
        Key::from_segments(&["a/b"]).unwrap_err();
    }

    #[test]
    fn starts_with() {
        let key = Key::new("/blocks/x");
        assert!(key.starts_with(&Key::root()));
        assert!(key.starts_with(&Key::new("/blocks")));
        assert!(key.starts_with(&Key::new("/blocks/x")));
        assert!(!key.starts_with(&Key::new("/block")));
        assert!(!key.starts_with(&Key::new("/blocks/x/y")));
    }

    #[test]
    fn strip_prefix() {
        let key = Key::new("/blocks/x");
        assert_eq!(key.strip_prefix(&Key::new("/blocks")).name(), "/x");
        assert_eq!(key.strip_prefix(&Key::root()).name(), "/blocks/x");
        assert_eq!(key.strip_prefix(&Key::new("/other")).name(), "/blocks/x");
        assert!(key.strip_prefix(&key).is_root());
    }

    #[test]
    fn with_prefix() {
        let key = Key::new("/x");
        assert_eq!(key.with_prefix(&Key::new("/blocks")).name(), "/blocks/x");
        assert_eq!(key.with_prefix(&Key::root()).name(), "/x");
        assert_eq!(Key::root().with_prefix(&Key::new("/a")).name(), "/a");
    }
}
