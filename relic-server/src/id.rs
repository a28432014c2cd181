//! Random identifiers for relics, comments, bookmarks and reports.

use data_encoding::HEXLOWER;

use crate::error::{GenerationExhaustedSnafu, Result};

/// Number of random bytes in an id.
pub const ID_BYTES: usize = 16;

/// How many collisions [`generate_unique_id`] tolerates by default.
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Generate a random id: 128 bits as 32 lowercase hex characters.
pub fn generate_id() -> String {
    let bytes: [u8; ID_BYTES] = rand::random();
    HEXLOWER.encode(&bytes)
}

/// Generate an id for which `exists` returns `false`.
///
/// Gives up with [`crate::error::Error::GenerationExhausted`] after `max_retries` collisions.
pub fn generate_unique_id(
    max_retries: usize,
    mut exists: impl FnMut(&str) -> Result<bool>,
) -> Result<String> {
    for _ in 0..max_retries {
        let id = generate_id();
        if !exists(&id)? {
            return Ok(id);
        }
        tracing::debug!(%id, "generated id collided, retrying");
    }
    GenerationExhaustedSnafu {
        attempts: max_retries,
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::error::Error;

    #[test]
    fn ids_are_lowercase_hex() {
        let id = generate_id();
        assert_eq!(id.len(), ID_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn ids_do_not_repeat() {
        let ids: HashSet<_> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn unique_id_retries_on_collision() {
        let mut calls = 0;
        let id = generate_unique_id(DEFAULT_MAX_RETRIES, |_| {
            calls += 1;
            Ok(calls < 3)
        })
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn unique_id_gives_up() {
        let err = generate_unique_id(4, |_| Ok(true)).unwrap_err();
        assert!(matches!(err, Error::GenerationExhausted { attempts: 4 }));
    }
}
