//! Wire codec for the command-channel datagram shapes.
//!
//! Every datagram begins with a fixed 10-byte ASCII command field,
//! NUL-padded on the right, followed by an 8-byte big-endian sequence
//! number. The *complex* shape additionally carries an 8-byte
//! big-endian parameter field before the payload; the *simple* shape
//! goes straight from the sequence number into the payload.

use thiserror::Error;

/// Width of the fixed command field, in bytes.
pub const CMD_LEN: usize = 10;
/// Width of the sequence-number field, in bytes.
const SEQ_LEN: usize = 8;
/// Width of the parameter field (complex datagrams only), in bytes.
const PARAM_LEN: usize = 8;

/// Fixed prefix length of a simple datagram: cmd + seq.
pub const SIMPLE_PREFIX_LEN: usize = CMD_LEN + SEQ_LEN;
/// Fixed prefix length of a complex datagram: cmd + seq + param.
pub const COMPLEX_PREFIX_LEN: usize = SIMPLE_PREFIX_LEN + PARAM_LEN;

/// Largest datagram this protocol will ever put on the wire, chosen to
/// stay well clear of IPv4 fragmentation on a typical Ethernet MTU.
pub const MAX_SIMPL: usize = 512;

/// Largest payload a simple datagram can carry.
pub const MAX_SIMPL_DATA_LEN: usize = MAX_SIMPL - SIMPLE_PREFIX_LEN;
/// Largest payload a complex datagram can carry.
pub const MAX_CMPLX_DATA_LEN: usize = MAX_SIMPL - COMPLEX_PREFIX_LEN;

/// Errors the codec can report while decoding an inbound datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {got} bytes, need at least {need}")]
    TooShort { got: usize, need: usize },
}

/// A command tag, kept as the raw fixed-width bytes it was decoded
/// from (or will be encoded as). Comparison against a literal tag uses
/// [`Tag::matches`], never string/substring equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(pub [u8; CMD_LEN]);

impl Tag {
    /// Build a tag from a literal ASCII command name, NUL-padding the
    /// remainder of the 10-byte field.
    pub const fn new(name: &str) -> Tag {
        let bytes = name.as_bytes();
        let mut buf = [0u8; CMD_LEN];
        let mut i = 0;
        while i < bytes.len() {
            buf[i] = bytes[i];
            i += 1;
        }
        Tag(buf)
    }

    /// Canonical command-tag equality: `literal` must be a prefix of
    /// the field, and every byte after the prefix must be NUL. Case
    /// sensitive; never a substring match.
    pub fn matches(&self, literal: &str) -> bool {
        let lit = literal.as_bytes();
        if lit.len() > CMD_LEN {
            return false;
        }
        if &self.0[..lit.len()] != lit {
            return false;
        }
        self.0[lit.len()..].iter().all(|&b| b == 0)
    }
}

pub mod tags {
    use super::Tag;

    pub const HELLO: Tag = Tag::new("HELLO");
    pub const GOOD_DAY: Tag = Tag::new("GOOD_DAY");
    pub const LIST: Tag = Tag::new("LIST");
    pub const MY_LIST: Tag = Tag::new("MY_LIST");
    pub const GET: Tag = Tag::new("GET");
    pub const CONNECT_ME: Tag = Tag::new("CONNECT_ME");
    pub const DEL: Tag = Tag::new("DEL");
    pub const ADD: Tag = Tag::new("ADD");
    pub const CAN_ADD: Tag = Tag::new("CAN_ADD");
    pub const NO_WAY: Tag = Tag::new("NO_WAY");
}

/// A decoded simple datagram: cmd + seq + payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCmd {
    pub tag: Tag,
    pub seq: u64,
    pub data: Vec<u8>,
}

/// A decoded complex datagram: cmd + seq + param + payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexCmd {
    pub tag: Tag,
    pub seq: u64,
    pub param: u64,
    pub data: Vec<u8>,
}

/// Decode a simple datagram. Rejects anything shorter than
/// [`SIMPLE_PREFIX_LEN`].
pub fn decode_simple(bytes: &[u8]) -> Result<SimpleCmd, WireError> {
    if bytes.len() < SIMPLE_PREFIX_LEN {
        return Err(WireError::TooShort {
            got: bytes.len(),
            need: SIMPLE_PREFIX_LEN,
        });
    }
    let mut tag = [0u8; CMD_LEN];
    tag.copy_from_slice(&bytes[..CMD_LEN]);
    let seq = u64::from_be_bytes(bytes[CMD_LEN..CMD_LEN + SEQ_LEN].try_into().unwrap());
    let data = bytes[SIMPLE_PREFIX_LEN..].to_vec();
    Ok(SimpleCmd {
        tag: Tag(tag),
        seq,
        data,
    })
}

/// Decode a complex datagram. Rejects anything shorter than
/// [`COMPLEX_PREFIX_LEN`].
pub fn decode_complex(bytes: &[u8]) -> Result<ComplexCmd, WireError> {
    if bytes.len() < COMPLEX_PREFIX_LEN {
        return Err(WireError::TooShort {
            got: bytes.len(),
            need: COMPLEX_PREFIX_LEN,
        });
    }
    let mut tag = [0u8; CMD_LEN];
    tag.copy_from_slice(&bytes[..CMD_LEN]);
    let seq = u64::from_be_bytes(bytes[CMD_LEN..CMD_LEN + SEQ_LEN].try_into().unwrap());
    let param_start = CMD_LEN + SEQ_LEN;
    let param = u64::from_be_bytes(
        bytes[param_start..param_start + PARAM_LEN]
            .try_into()
            .unwrap(),
    );
    let data = bytes[COMPLEX_PREFIX_LEN..].to_vec();
    Ok(ComplexCmd {
        tag: Tag(tag),
        seq,
        param,
        data,
    })
}

/// Encode a simple datagram.
pub fn encode_simple(tag: Tag, seq: u64, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SIMPLE_PREFIX_LEN + data.len());
    buf.extend_from_slice(&tag.0);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Encode a complex datagram.
pub fn encode_complex(tag: Tag, seq: u64, param: u64, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(COMPLEX_PREFIX_LEN + data.len());
    buf.extend_from_slice(&tag.0);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&param.to_be_bytes());
    buf.extend_from_slice(data);
    buf
}
