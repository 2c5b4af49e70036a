//! Binary asset envelopes shared by the image, material and static-mesh
//! assets: a short ASCII magic, a little-endian u64 format version, one
//! encoding byte, then the payload as either bincode or JSON.

pub mod image;
pub mod material;
pub mod mesh;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetEncoding {
    Binary,
    Json,
}

impl AssetEncoding {
    fn tag(&self) -> u8 {
        match self {
            Self::Binary => 0,
            Self::Json => 1,
        }
    }

    fn from_tag(tag: u8) -> anyhow::Result<Self> {
        match tag {
            0 => Ok(Self::Binary),
            1 => Ok(Self::Json),
            other => anyhow::bail!("unknown asset encoding tag {other}"),
        }
    }
}

pub(crate) fn write_envelope<T: Serialize>(
    magic: &str,
    version: u64,
    encoding: AssetEncoding,
    value: &T,
) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(magic.as_bytes());
    out.extend_from_slice(&version.to_le_bytes());
    out.push(encoding.tag());
    match encoding {
        AssetEncoding::Binary => {
            let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
            out.extend_from_slice(&payload);
        }
        AssetEncoding::Json => {
            serde_json::to_writer(&mut out, value)?;
        }
    }
    Ok(out)
}

pub(crate) fn read_envelope<T: DeserializeOwned>(
    magic: &str,
    supported_version: u64,
    bytes: &[u8],
) -> anyhow::Result<T> {
    let header_len = magic.len() + std::mem::size_of::<u64>() + 1;
    anyhow::ensure!(
        bytes.len() >= header_len,
        "asset file smaller than its header"
    );
    anyhow::ensure!(
        &bytes[..magic.len()] == magic.as_bytes(),
        "asset file does not start with the expected '{magic}' identifier"
    );
    let version = u64::from_le_bytes(
        bytes[magic.len()..magic.len() + 8]
            .try_into()
            .expect("sliced exactly 8 bytes"),
    );
    anyhow::ensure!(
        version <= supported_version,
        "asset version {version} is newer than the supported {supported_version}"
    );
    let encoding = AssetEncoding::from_tag(bytes[magic.len() + 8])?;
    let payload = &bytes[header_len..];
    match encoding {
        AssetEncoding::Binary => {
            let (value, _) =
                bincode::serde::decode_from_slice::<T, _>(payload, bincode::config::standard())?;
            Ok(value)
        }
        AssetEncoding::Json => Ok(serde_json::from_slice(payload)?),
    }
}

/// Sniffs whether `bytes` carries the given asset identifier.
pub fn has_magic(bytes: &[u8], magic: &str) -> bool {
    bytes.len() >= magic.len() && &bytes[..magic.len()] == magic.as_bytes()
}
