//! Byte protocol of a particular loom brand.

use crate::error::LinkError;
use crate::framing::Framing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoomEvent {
    /// The operator pressed the pedal: the loom wants the next shafts.
    Advance,
    Direction { forward: bool },
    Shafts(u64),
    Motion { moving: bool },
    Identity { num_shafts: u32 },
}

pub trait LoomCodec: Send + Sync {
    fn framing(&self) -> Framing;
    fn encode_shafts(&self, shaft_word: u64) -> Vec<u8>;
    fn encode_direction(&self, forward: bool) -> Vec<u8>;
    /// `None` if the loom cannot be asked who it is.
    fn encode_identity_query(&self) -> Option<Vec<u8>>;
    fn decode(&self, frame: &[u8]) -> Result<LoomEvent, LinkError>;
}

/// Newline-terminated ASCII profile spoken by the example loom and the mock.
///
/// | to loom | meaning | from loom | meaning |
/// |---|---|---|---|
/// | `C<hex>` | raise shafts | `p` | next pick wanted |
/// | `U0` / `U1` | weave / unweave | `u0` / `u1` | direction |
/// | `I` | identity query | `c<hex>` | shafts raised |
/// | | | `m0` / `m1` | motion done / moving |
/// | | | `i<n>` | loom has `n` shafts |
#[derive(Debug, Default, Clone, Copy)]
pub struct ExampleCodec;

impl LoomCodec for ExampleCodec {
    fn framing(&self) -> Framing {
        Framing::newline()
    }

    fn encode_shafts(&self, shaft_word: u64) -> Vec<u8> {
        format!("C{shaft_word:08x}\n").into_bytes()
    }

    fn encode_direction(&self, forward: bool) -> Vec<u8> {
        if forward { b"U0\n".to_vec() } else { b"U1\n".to_vec() }
    }

    fn encode_identity_query(&self) -> Option<Vec<u8>> {
        Some(b"I\n".to_vec())
    }

    fn decode(&self, frame: &[u8]) -> Result<LoomEvent, LinkError> {
        let text = std::str::from_utf8(frame)
            .map_err(|_| codec_error(frame, "not ascii"))?
            .trim();
        let mut chars = text.chars();
        let Some(code) = chars.next() else {
            return Err(codec_error(frame, "empty reply"));
        };
        let arg = chars.as_str();
        match (code, arg) {
            ('p', "") => Ok(LoomEvent::Advance),
            ('u', "0") => Ok(LoomEvent::Direction { forward: true }),
            ('u', "1") => Ok(LoomEvent::Direction { forward: false }),
            ('m', "0") => Ok(LoomEvent::Motion { moving: false }),
            ('m', "1") => Ok(LoomEvent::Motion { moving: true }),
            ('c', hex) if !hex.is_empty() => u64::from_str_radix(hex, 16)
                .map(LoomEvent::Shafts)
                .map_err(|_| codec_error(frame, "bad shaft word")),
            ('i', num) if !num.is_empty() => num
                .parse::<u32>()
                .map(|num_shafts| LoomEvent::Identity { num_shafts })
                .map_err(|_| codec_error(frame, "bad shaft count")),
            _ => Err(codec_error(frame, "unknown reply")),
        }
    }
}

fn codec_error(frame: &[u8], reason: &str) -> LinkError {
    LinkError::Codec {
        reply: String::from_utf8_lossy(frame).into_owned(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_commands() {
        let c = ExampleCodec;
        assert_eq!(c.encode_shafts(0x5), b"C00000005\n");
        assert_eq!(c.encode_direction(true), b"U0\n");
        assert_eq!(c.encode_direction(false), b"U1\n");
        assert_eq!(c.encode_identity_query().as_deref(), Some(&b"I\n"[..]));
    }

    #[test]
    fn decodes_replies() {
        let c = ExampleCodec;
        assert_eq!(c.decode(b"p").unwrap(), LoomEvent::Advance);
        assert_eq!(c.decode(b"u1").unwrap(), LoomEvent::Direction { forward: false });
        assert_eq!(c.decode(b"m1").unwrap(), LoomEvent::Motion { moving: true });
        assert_eq!(c.decode(b"c0000000a").unwrap(), LoomEvent::Shafts(10));
        assert_eq!(c.decode(b"i24 ").unwrap(), LoomEvent::Identity { num_shafts: 24 });
    }

    #[test]
    fn rejects_junk() {
        let c = ExampleCodec;
        for bad in [&b""[..], b"u2", b"pp", b"cxyz", b"i", b"\xff", b"z"] {
            assert!(matches!(c.decode(bad), Err(LinkError::Codec { .. })), "{bad:?}");
        }
    }
}
