//! Utility functions

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Generate a random alphanumeric token of the given length.
///
/// Used for correlation IDs and isolated-directory suffixes. Tokens are not
/// cryptographic; they only need to be unique within a process lifetime.
pub(crate) fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
