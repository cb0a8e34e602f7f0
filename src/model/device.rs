use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use crate::error::ApnsError;
use crate::protocol::TOKEN_LEN;
use crate::util::fletcher::fletcher16;

/// A push target, identified by its device token. The token's Fletcher-16 checksum is
///  computed once on construction and serves for partitioning devices across connections.
#[derive(Clone, Copy)]
pub struct Device {
    token: [u8; TOKEN_LEN],
    checksum: u16,
}

impl Device {
    pub fn new(token: [u8; TOKEN_LEN]) -> Device {
        Device {
            checksum: fletcher16(&token),
            token,
        }
    }

    pub fn token(&self) -> &[u8; TOKEN_LEN] {
        &self.token
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Stable assignment of this device to one of `shard_count` connections.
    ///
    /// Panics if `shard_count` is zero.
    pub fn partition(&self, shard_count: u16) -> u16 {
        self.checksum % shard_count
    }
}

impl TryFrom<&[u8]> for Device {
    type Error = ApnsError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let token: [u8; TOKEN_LEN] = value.try_into()
            .map_err(|_| ApnsError::InvalidTokenLength { expected: TOKEN_LEN, actual: value.len() })?;
        Ok(Device::new(token))
    }
}

impl FromStr for Device {
    type Err = ApnsError;

    /// 64 hex digits in either case, surrounding whitespace is ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 2 * TOKEN_LEN {
            return Err(ApnsError::InvalidTokenLength { expected: TOKEN_LEN, actual: s.len() / 2 });
        }

        let mut token = [0u8; TOKEN_LEN];
        for (i, pair) in s.as_bytes().chunks_exact(2).enumerate() {
            let hi = hex_value(pair[0]).ok_or_else(|| ApnsError::InvalidTokenHex(s.to_string()))?;
            let lo = hex_value(pair[1]).ok_or_else(|| ApnsError::InvalidTokenHex(s.to_string()))?;
            token[i] = (hi << 4) | lo;
        }
        Ok(Device::new(token))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in &self.token {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Debug for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Device({})", self)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.checksum == other.checksum && self.token == other.token
    }
}
impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn sequential_token() -> [u8; TOKEN_LEN] {
        let mut token = [0u8; TOKEN_LEN];
        for (i, b) in token.iter_mut().enumerate() {
            *b = i as u8;
        }
        token
    }

    #[test]
    fn test_parse_and_format() {
        let device: Device = HEX.parse().unwrap();
        assert_eq!(device.token(), &sequential_token());
        assert_eq!(device.to_string(), HEX);

        let upper: Device = format!("  {}\n", HEX.to_uppercase()).parse().unwrap();
        assert_eq!(upper, device);
    }

    #[rstest]
    #[case::too_short("0001")]
    #[case::too_long("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20")]
    fn test_parse_wrong_length(#[case] s: &str) {
        assert!(matches!(s.parse::<Device>(), Err(ApnsError::InvalidTokenLength { .. })));
    }

    #[test]
    fn test_parse_invalid_digit() {
        let s = HEX.replace('a', "g");
        assert!(matches!(s.parse::<Device>(), Err(ApnsError::InvalidTokenHex(_))));
    }

    #[test]
    fn test_try_from_slice() {
        let token = sequential_token();
        assert_eq!(Device::try_from(&token[..]).unwrap(), Device::new(token));
        assert!(matches!(
            Device::try_from(&token[..31]),
            Err(ApnsError::InvalidTokenLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_checksum_and_partition() {
        let device = Device::new(sequential_token());
        assert_eq!(device.checksum(), fletcher16(&sequential_token()));
        for shard_count in 1..10u16 {
            assert_eq!(device.partition(shard_count), device.checksum() % shard_count);
        }
    }
}
