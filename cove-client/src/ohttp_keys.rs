//! Parse the server's `application/ohttp-keys` key configuration list
//! (RFC 9458 §3): length-prefixed key configs, each carrying a key id, a
//! KEM id, the public key, and the supported symmetric cipher suites.

use anyhow::{bail, ensure};

pub(crate) const KEM_X25519_HKDF_SHA256: u16 = 0x0020;
pub(crate) const KDF_HKDF_SHA256: u16 = 0x0001;
pub(crate) const AEAD_AES_128_GCM: u16 = 0x0001;

/// One parsed key configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ServerKeyConfig {
    pub key_id: u8,
    pub kem_id: u16,
    pub public_key: Vec<u8>,
    /// `(kdf_id, aead_id)` pairs.
    pub cipher_suites: Vec<(u16, u16)>,
}

impl ServerKeyConfig {
    pub(crate) fn supports_suite(&self, kdf_id: u16, aead_id: u16) -> bool {
        self.cipher_suites.contains(&(kdf_id, aead_id))
    }
}

/// Parse the full key configuration list.
pub(crate) fn parse_key_configs(
    bytes: &[u8],
) -> anyhow::Result<Vec<ServerKeyConfig>> {
    let mut reader = Reader(bytes);
    let mut configs = Vec::new();

    while !reader.0.is_empty() {
        let config_len = reader.read_u16()? as usize;
        let mut config = Reader(reader.read_slice(config_len)?);
        configs.push(parse_one_config(&mut config)?);
    }

    ensure!(!configs.is_empty(), "key configuration list is empty");
    Ok(configs)
}

/// Pick the first config usable with our HPKE ciphersuite
/// (X25519-HKDF-SHA256 / HKDF-SHA256 / AES-128-GCM).
pub(crate) fn select_key_config(
    configs: Vec<ServerKeyConfig>,
) -> anyhow::Result<ServerKeyConfig> {
    configs
        .into_iter()
        .find(|config| {
            config.kem_id == KEM_X25519_HKDF_SHA256
                && config.supports_suite(KDF_HKDF_SHA256, AEAD_AES_128_GCM)
        })
        .ok_or_else(|| {
            anyhow::format_err!(
                "no key configuration supports \
                 X25519-HKDF-SHA256 / HKDF-SHA256 / AES-128-GCM"
            )
        })
}

fn parse_one_config(
    reader: &mut Reader<'_>,
) -> anyhow::Result<ServerKeyConfig> {
    let key_id = reader.read_u8()?;
    let kem_id = reader.read_u16()?;

    let public_key_len = match kem_id {
        KEM_X25519_HKDF_SHA256 => 32,
        // DHKEM(P-256, HKDF-SHA256)
        0x0010 => 65,
        // DHKEM(P-384, HKDF-SHA384)
        0x0011 => 97,
        other => bail!("unknown KEM id: {other:#06x}"),
    };
    let public_key = reader.read_slice(public_key_len)?.to_vec();

    let suites_len = reader.read_u16()? as usize;
    ensure!(
        suites_len > 0 && suites_len % 4 == 0,
        "bad cipher suites length: {suites_len}",
    );
    let mut cipher_suites = Vec::with_capacity(suites_len / 4);
    for _ in 0..suites_len / 4 {
        let kdf_id = reader.read_u16()?;
        let aead_id = reader.read_u16()?;
        cipher_suites.push((kdf_id, aead_id));
    }

    ensure!(reader.0.is_empty(), "trailing bytes in key configuration");

    Ok(ServerKeyConfig {
        key_id,
        kem_id,
        public_key,
        cipher_suites,
    })
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn read_u8(&mut self) -> anyhow::Result<u8> {
        let slice = self.read_slice(1)?;
        Ok(slice[0])
    }

    fn read_u16(&mut self) -> anyhow::Result<u16> {
        let slice = self.read_slice(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    fn read_slice(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        ensure!(self.0.len() >= len, "key configuration is truncated");
        let (head, tail) = self.0.split_at(len);
        self.0 = tail;
        Ok(head)
    }
}

/// Encode one key configuration. Used by tests and local tooling; the
/// production client only ever parses.
pub(crate) fn encode_key_config(config: &ServerKeyConfig) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(config.key_id);
    body.extend_from_slice(&config.kem_id.to_be_bytes());
    body.extend_from_slice(&config.public_key);
    let suites_len = (config.cipher_suites.len() * 4) as u16;
    body.extend_from_slice(&suites_len.to_be_bytes());
    for (kdf_id, aead_id) in &config.cipher_suites {
        body.extend_from_slice(&kdf_id.to_be_bytes());
        body.extend_from_slice(&aead_id.to_be_bytes());
    }

    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&body);
    out
}
