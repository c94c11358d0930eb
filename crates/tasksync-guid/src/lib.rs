/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! An opaque, immutable identifier used by every store in the sync core:
//! [`Task::id`], [`TaskList::id`], account ids. A thin newtype over `String`
//! rather than a raw `String` so the type system catches the "guid passed
//! where a title was expected" class of bug.

use std::fmt;
use std::ops::Deref;

#[cfg(feature = "rusqlite_support")]
mod rusqlite_support;
#[cfg(feature = "serde_support")]
mod serde_support;

#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Guid(String);

impl Guid {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn into_string(self) -> String {
        self.0
    }

    #[cfg(feature = "random")]
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 9];
        rand::thread_rng().fill_bytes(&mut bytes);
        Guid(base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            bytes,
        ))
    }
}

impl From<String> for Guid {
    #[inline]
    fn from(s: String) -> Self {
        Guid(s)
    }
}

impl From<&str> for Guid {
    #[inline]
    fn from(s: &str) -> Self {
        Guid(s.to_owned())
    }
}

impl Deref for Guid {
    type Target = str;
    #[inline]
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Guid {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({:?})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_guids_are_distinct() {
        let a = Guid::random();
        let b = Guid::random();
        assert_ne!(a, b);
    }

    #[test]
    fn from_str_roundtrips() {
        let g: Guid = "abc123".into();
        assert_eq!(g.as_str(), "abc123");
        assert_eq!(g.into_string(), "abc123".to_string());
    }
}
