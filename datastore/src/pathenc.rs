//! Percent-encoding of key segments so they're safe to use as filesystem
//! path components, shared by the filesystem-backed engines.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use snafu::OptionExt;
use std::path::Path;

use super::{error, Result};

// This describes the set of characters we encode when making the filesystem
// path for a given key.  Any non-ASCII characters, plus these ones, will be
// encoded.  We start off very strict (anything not alphanumeric) and remove
// characters we'll allow, to make inspecting the filesystem easier.
const ENCODE_CHARACTERS: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-');

/// Encodes a string so that it's safe to use as a filesystem path component.
pub(crate) fn encode_path_component<S: AsRef<str>>(segment: S) -> String {
    let encoded = utf8_percent_encode(segment.as_ref(), ENCODE_CHARACTERS);
    encoded.to_string()
}

/// Decodes a path component, removing the encoding that's applied to make it
/// filesystem-safe.
pub(crate) fn decode_path_component<S, P>(segment: S, path: P) -> Result<String>
where
    S: AsRef<str>,
    P: AsRef<Path>,
{
    let segment = segment.as_ref();

    percent_decode_str(segment)
        .decode_utf8()
        // Get back a plain String.
        .map(|cow| cow.into_owned())
        // decode_utf8 will only fail if someone messed with the filesystem
        // contents directly and created a filename that contains
        // percent-encoded bytes that are invalid UTF-8.
        .ok()
        .context(error::CorruptionSnafu {
            path: path.as_ref(),
            msg: format!("invalid UTF-8 in encoded segment '{}'", segment),
        })
}
