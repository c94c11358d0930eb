/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use super::Guid;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(de::Error::custom("guid must not be empty"));
        }
        Ok(Guid::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let g: Guid = "abc".into();
        let json = serde_json::to_string(&g).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: Guid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}
