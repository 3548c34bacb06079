//! Destination references.
//!
//! A destination is either given directly as a pubkey plus relay list or as a
//! bech32 `nprofile` string (TLV-encoded pubkey and relay hints).

use std::collections::HashSet;

use crate::error::{PeerError, Result};

const BECH32_CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const BECH32_CHECKSUM_LEN: usize = 6;
const BECH32_GENERATORS: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
const NPROFILE_HRP: &str = "nprofile";
const MAX_REFERENCE_LEN: usize = 8 * 1024;
const PUBKEY_LEN: usize = 32;

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;

/// A remote public key and the relays it can be reached on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Hex-encoded public key.
    pub pubkey: String,
    /// Relay URLs, possibly with duplicates until resolved.
    pub relays: Vec<String>,
}

impl Destination {
    pub fn new(pubkey: impl Into<String>, relays: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            pubkey: pubkey.into(),
            relays: relays.into_iter().map(Into::into).collect(),
        }
    }
}

/// How a caller names a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationRef {
    /// Already structured pubkey and relays.
    Pointer(Destination),
    /// Encoded `nprofile` string.
    Encoded(String),
}

impl DestinationRef {
    /// Resolve into a [`Destination`], decoding if needed.
    pub fn resolve(self) -> Result<Destination> {
        match self {
            DestinationRef::Pointer(destination) => Ok(destination),
            DestinationRef::Encoded(reference) => decode_nprofile(&reference),
        }
    }
}

impl From<Destination> for DestinationRef {
    fn from(destination: Destination) -> Self {
        DestinationRef::Pointer(destination)
    }
}

impl From<&str> for DestinationRef {
    fn from(reference: &str) -> Self {
        DestinationRef::Encoded(reference.to_string())
    }
}

impl From<String> for DestinationRef {
    fn from(reference: String) -> Self {
        DestinationRef::Encoded(reference)
    }
}

/// Drop repeated relay URLs, keeping first occurrences in order.
pub fn dedupe_relays(relays: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(relays.len());
    relays
        .iter()
        .filter(|relay| seen.insert(relay.as_str()))
        .cloned()
        .collect()
}

/// Decode a bech32 `nprofile` into its pubkey and relay hints.
pub fn decode_nprofile(reference: &str) -> Result<Destination> {
    let (hrp, data) = bech32_decode(reference.trim())?;
    if hrp != NPROFILE_HRP {
        return Err(PeerError::InvalidReference(format!(
            "expected '{NPROFILE_HRP}', got '{hrp}'"
        )));
    }
    parse_profile_tlv(&data)
}

fn parse_profile_tlv(data: &[u8]) -> Result<Destination> {
    let mut pubkey = None;
    let mut relays = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let (&kind, after_kind) = rest
            .split_first()
            .ok_or_else(|| invalid("truncated TLV type"))?;
        let (&len, after_len) = after_kind
            .split_first()
            .ok_or_else(|| invalid("truncated TLV length"))?;
        let len = len as usize;
        if after_len.len() < len {
            return Err(invalid(&format!(
                "TLV value of {len} bytes exceeds remaining {}",
                after_len.len()
            )));
        }
        let (value, next) = after_len.split_at(len);

        match kind {
            TLV_SPECIAL => {
                if value.len() != PUBKEY_LEN {
                    return Err(invalid(&format!("pubkey must be {PUBKEY_LEN} bytes, got {len}")));
                }
                pubkey.get_or_insert_with(|| hex::encode(value));
            }
            TLV_RELAY => {
                let relay = std::str::from_utf8(value)
                    .map_err(|_| invalid("relay hint is not UTF-8"))?;
                relays.push(relay.to_string());
            }
            // Unknown TLV types are skipped.
            _ => {}
        }
        rest = next;
    }

    let pubkey = pubkey.ok_or_else(|| invalid("profile carries no pubkey"))?;
    Ok(Destination { pubkey, relays })
}

fn bech32_decode(input: &str) -> Result<(String, Vec<u8>)> {
    if input.is_empty() || input.len() > MAX_REFERENCE_LEN {
        return Err(invalid(&format!("invalid length: {}", input.len())));
    }
    let has_lower = input.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = input.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(invalid("mixed-case bech32 string"));
    }
    let input = input.to_ascii_lowercase();

    let separator = input.rfind('1').ok_or_else(|| invalid("missing separator"))?;
    let (hrp, data_part) = (&input[..separator], &input[separator + 1..]);
    if hrp.is_empty() || data_part.len() < BECH32_CHECKSUM_LEN {
        return Err(invalid("bech32 string too short"));
    }

    let values = data_part
        .bytes()
        .map(|c| {
            BECH32_CHARSET
                .iter()
                .position(|&candidate| candidate == c)
                .map(|pos| pos as u8)
                .ok_or_else(|| invalid(&format!("invalid character '{}'", c as char)))
        })
        .collect::<Result<Vec<u8>>>()?;

    let mut checked = hrp_expand(hrp);
    checked.extend_from_slice(&values);
    if polymod(&checked) != 1 {
        return Err(invalid("checksum mismatch"));
    }

    let payload = &values[..values.len() - BECH32_CHECKSUM_LEN];
    let bytes = convert_5_to_8(payload)?;
    Ok((hrp.to_string(), bytes))
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out: Vec<u8> = hrp.bytes().map(|b| b >> 5).collect();
    out.push(0);
    out.extend(hrp.bytes().map(|b| b & 31));
    out
}

fn polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for &value in values {
        let top = chk >> 25;
        chk = ((chk & 0x1ff_ffff) << 5) ^ u32::from(value);
        for (i, generator) in BECH32_GENERATORS.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= generator;
            }
        }
    }
    chk
}

fn convert_5_to_8(data: &[u8]) -> Result<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::with_capacity(data.len() * 5 / 8);
    for &value in data {
        acc = (acc << 5) | u32::from(value);
        bits += 5;
        while bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xff) as u8);
        }
        acc &= (1 << bits) - 1;
    }
    if bits >= 5 || acc != 0 {
        return Err(invalid("non-zero padding"));
    }
    Ok(out)
}

fn invalid(message: &str) -> PeerError {
    PeerError::InvalidReference(message.to_string())
}
