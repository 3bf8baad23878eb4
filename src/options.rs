//! Typed, name-addressable option store (component B).
//!
//! A keyed map from `(universe, code)` to an option value, with lookup,
//! evaluation, and TLV (de)serialization. Real `dhclient` options can be
//! expressions drawn from the config file rather than constants; since the
//! config-file parser is out of scope here, [`OptionValue::Expr`] exists so
//! the type matches the interface an external config layer would fill in,
//! but nothing in this crate ever constructs one.

use std::collections::BTreeMap;

use crate::error::CodecError;
use crate::packet::OptionCode;

/// An option namespace. This crate only ever populates `Dhcp`; the other
/// variants exist because the store's key space must accommodate options
/// from collaborators (DHCPv6, FQDN/DDNS, vendor encapsulated options) that
/// are out of scope here but share the same journal and script-runner
/// environment-variable format.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Universe {
    Dhcp,
    Dhcpv6,
    Fqdn,
    Vendor(String),
}

/// A stored option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// A concrete byte string, as parsed off the wire or built for sending.
    Raw(Vec<u8>),
    /// An unevaluated config-file expression. Never produced by this crate;
    /// present only so the store's shape matches what an external
    /// config-file parser would feed into it.
    Expr(String),
}

/// Evaluation scope passed to [`OptionStore::evaluate`]. Kept minimal since
/// this crate never stores [`OptionValue::Expr`] values itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvalScope;

/// Keyed map from `(universe, code)` to an option value.
#[derive(Debug, Clone, Default)]
pub struct OptionStore {
    values: BTreeMap<(Universe, u8), OptionValue>,
}

impl OptionStore {
    pub fn new() -> Self {
        OptionStore {
            values: BTreeMap::new(),
        }
    }

    /// Save a raw byte string under the `Dhcp` universe.
    pub fn save_raw(&mut self, code: OptionCode, bytes: Vec<u8>) {
        self.save(Universe::Dhcp, code.into(), OptionValue::Raw(bytes));
    }

    pub fn save_u8(&mut self, code: OptionCode, v: u8) {
        self.save_raw(code, vec![v]);
    }

    pub fn save_u32(&mut self, code: OptionCode, v: u32) {
        self.save_raw(code, v.to_be_bytes().to_vec());
    }

    pub fn save_ipv4(&mut self, code: OptionCode, v: [u8; 4]) {
        self.save_raw(code, v.to_vec());
    }

    /// Save a value under an arbitrary universe/code pair.
    pub fn save(&mut self, universe: Universe, code: u8, value: OptionValue) {
        self.values.insert((universe, code), value);
    }

    /// Look up a raw value in the `Dhcp` universe.
    pub fn lookup_raw(&self, code: OptionCode) -> Option<&[u8]> {
        match self.lookup(&Universe::Dhcp, code.into())? {
            OptionValue::Raw(bytes) => Some(bytes),
            OptionValue::Expr(_) => None,
        }
    }

    pub fn lookup(&self, universe: &Universe, code: u8) -> Option<&OptionValue> {
        self.values.get(&(universe.clone(), code))
    }

    pub fn lookup_u8(&self, code: OptionCode) -> Option<u8> {
        self.lookup_raw(code)?.first().copied()
    }

    pub fn lookup_u32(&self, code: OptionCode) -> Option<u32> {
        let bytes = self.lookup_raw(code)?;
        Some(u32::from_be_bytes(bytes.get(0..4)?.try_into().ok()?))
    }

    pub fn lookup_ipv4(&self, code: OptionCode) -> Option<[u8; 4]> {
        let bytes = self.lookup_raw(code)?;
        bytes.get(0..4)?.try_into().ok()
    }

    /// Evaluate an option to a concrete byte string in the given scope.
    /// For a [`OptionValue::Raw`] this is simply the stored bytes; an
    /// [`OptionValue::Expr`] would need the config-file expression
    /// evaluator this crate doesn't implement, so it evaluates to `None`.
    pub fn evaluate(&self, universe: &Universe, code: u8, _scope: &EvalScope) -> Option<Vec<u8>> {
        match self.lookup(universe, code)? {
            OptionValue::Raw(bytes) => Some(bytes.clone()),
            OptionValue::Expr(_) => None,
        }
    }

    /// Iterate all options saved under `universe`, in code order.
    pub fn iter_universe<'a>(
        &'a self,
        universe: &'a Universe,
    ) -> impl Iterator<Item = (u8, &'a OptionValue)> + 'a {
        self.values
            .iter()
            .filter(move |((u, _), _)| u == universe)
            .map(|((_, code), v)| (*code, v))
    }

    pub fn contains(&self, code: OptionCode) -> bool {
        self.values.contains_key(&(Universe::Dhcp, code.into()))
    }

    /// Parse a TLV options buffer into this store. `overload` receives the
    /// option-overload byte (option 52) if present, for the caller to act on.
    pub(crate) fn parse_into(&mut self, bytes: &[u8], overload: &mut u8) -> Result<(), CodecError> {
        let mut i = 0;
        while i < bytes.len() {
            let code = bytes[i];
            if code == u8::from(OptionCode::Pad) {
                i += 1;
                continue;
            }
            if code == u8::from(OptionCode::End) {
                break;
            }
            let len = *bytes.get(i + 1).ok_or(CodecError::TruncatedOption {
                code,
                need: 1,
                have: 0,
            })? as usize;
            let start = i + 2;
            let value = bytes
                .get(start..start + len)
                .ok_or(CodecError::TruncatedOption {
                    code,
                    need: len,
                    have: bytes.len().saturating_sub(start),
                })?;
            if code == u8::from(OptionCode::OptionOverload) && !value.is_empty() {
                *overload = value[0];
            }
            self.values
                .insert((Universe::Dhcp, code), OptionValue::Raw(value.to_vec()));
            i = start + len;
        }
        Ok(())
    }

    /// Encode every `Dhcp`-universe option as TLVs (not terminated by `End`;
    /// the caller appends that).
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        for ((universe, code), value) in &self.values {
            if *universe != Universe::Dhcp {
                continue;
            }
            let OptionValue::Raw(bytes) = value else {
                continue;
            };
            buf.push(*code);
            buf.push(bytes.len() as u8);
            buf.extend_from_slice(bytes);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn save_and_lookup_round_trip() {
        let mut store = OptionStore::new();
        store.save_u32(OptionCode::IpAddressLeaseTime, 600);
        assert_eq!(store.lookup_u32(OptionCode::IpAddressLeaseTime), Some(600));
    }

    #[test]
    fn parse_into_stops_at_end_and_skips_pad() {
        let mut store = OptionStore::new();
        let mut overload = 0;
        let buf = [0u8, 0, 53, 1, 5, 255, 99, 99]; // pad, pad, msgtype=5, end, trailing garbage
        store.parse_into(&buf, &mut overload).unwrap();
        assert_eq!(store.lookup_u8(OptionCode::DhcpMessageType), Some(5));
    }

    #[test]
    fn parse_into_captures_overload_byte() {
        let mut store = OptionStore::new();
        let mut overload = 0;
        let buf = [52u8, 1, 0b11, 255];
        store.parse_into(&buf, &mut overload).unwrap();
        assert_eq!(overload, 0b11);
    }

    #[test]
    fn truncated_option_is_an_error() {
        let mut store = OptionStore::new();
        let mut overload = 0;
        let buf = [1u8, 4, 255, 255]; // subnet mask claims 4 bytes, only 2 present
        assert!(store.parse_into(&buf, &mut overload).is_err());
    }
}
