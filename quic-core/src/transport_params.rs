//! QUIC transport parameters (RFC 9000 §18, extension `0xffa5`): the
//! `(id, len, value)` triples exchanged inside the TLS handshake and
//! negotiated once per connection (spec §6).

use crate::codec::varint;
use crate::error::{QuicError, Result};

pub const TLS_EXT_TRANSPORT_PARAMS: u16 = 0xffa5;
/// Transport parameters are small; this core rejects an encoded blob
/// larger than this before attempting to parse it (spec §6).
pub const MAX_ENCODED_LEN: usize = 128;

const ID_ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
const ID_MAX_IDLE_TIMEOUT: u64 = 0x01;
const ID_STATELESS_RESET_TOKEN: u64 = 0x02;
const ID_MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
const ID_INITIAL_MAX_DATA: u64 = 0x04;
const ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
const ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
const ID_INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
const ID_INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
const ID_INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
const ID_ACK_DELAY_EXPONENT: u64 = 0x0a;
const ID_MAX_ACK_DELAY: u64 = 0x0b;
const ID_DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
const ID_PREFERRED_ADDRESS: u64 = 0x0d;
const ID_ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;

/// Transport parameters this core negotiates, client- or server-sourced.
/// `original_destination_connection_id`, `stateless_reset_token` and
/// `preferred_address` are server-only and left unset on a client-sourced
/// instance by construction (decoding one from a client rejects them).
#[derive(Clone, Debug)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<Vec<u8>>,
    pub max_idle_timeout: u64,
    pub stateless_reset_token: Option<[u8; 16]>,
    pub max_udp_payload_size: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u64,
    pub max_ack_delay: u64,
    pub disable_active_migration: bool,
    pub active_connection_id_limit: u64,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: 0,
            stateless_reset_token: None,
            max_udp_payload_size: 65527,
            initial_max_data: 0,
            initial_max_stream_data_bidi_local: 0,
            initial_max_stream_data_bidi_remote: 0,
            initial_max_stream_data_uni: 0,
            initial_max_streams_bidi: 0,
            initial_max_streams_uni: 0,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            disable_active_migration: false,
            active_connection_id_limit: 2,
        }
    }
}

impl TransportParameters {
    /// Encode as the server would send it: includes the server-only
    /// parameters set on `self`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(odcid) = &self.original_destination_connection_id {
            encode_opaque(&mut out, ID_ORIGINAL_DESTINATION_CONNECTION_ID, odcid);
        }
        if self.max_idle_timeout != 0 {
            encode_varint_param(&mut out, ID_MAX_IDLE_TIMEOUT, self.max_idle_timeout);
        }
        if let Some(token) = &self.stateless_reset_token {
            encode_opaque(&mut out, ID_STATELESS_RESET_TOKEN, token);
        }
        encode_varint_param(&mut out, ID_MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size);
        encode_varint_param(&mut out, ID_INITIAL_MAX_DATA, self.initial_max_data);
        encode_varint_param(&mut out, ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL, self.initial_max_stream_data_bidi_local);
        encode_varint_param(&mut out, ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE, self.initial_max_stream_data_bidi_remote);
        encode_varint_param(&mut out, ID_INITIAL_MAX_STREAM_DATA_UNI, self.initial_max_stream_data_uni);
        encode_varint_param(&mut out, ID_INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi);
        encode_varint_param(&mut out, ID_INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni);
        encode_varint_param(&mut out, ID_ACK_DELAY_EXPONENT, self.ack_delay_exponent);
        encode_varint_param(&mut out, ID_MAX_ACK_DELAY, self.max_ack_delay);
        if self.disable_active_migration {
            encode_opaque(&mut out, ID_DISABLE_ACTIVE_MIGRATION, &[]);
        }
        encode_varint_param(&mut out, ID_ACTIVE_CONNECTION_ID_LIMIT, self.active_connection_id_limit);

        if out.len() > MAX_ENCODED_LEN {
            return Err(QuicError::FrameEncodingError("transport parameters exceed 128 bytes".into()));
        }
        Ok(out)
    }

    /// Decode a blob received from the peer. `from_client` enforces that
    /// the server-only parameters are absent (spec §6: "Forbidden
    /// parameters from the client MUST terminate the connection").
    pub fn decode(buf: &[u8], from_client: bool) -> Result<Self> {
        if buf.len() > MAX_ENCODED_LEN {
            return Err(QuicError::ProtocolViolation("transport parameters exceed 128 bytes".into()));
        }
        let mut params = TransportParameters::default();
        let mut pos = 0usize;
        while pos < buf.len() {
            let (id, id_len) = varint::decode(&buf[pos..])?;
            pos += id_len;
            let (len, len_len) = varint::decode(&buf[pos..])?;
            pos += len_len;
            let len = len as usize;
            if buf.len() < pos + len {
                return Err(QuicError::ProtocolViolation("transport parameter value truncated".into()));
            }
            let value = &buf[pos..pos + len];
            pos += len;

            if from_client
                && matches!(
                    id,
                    ID_ORIGINAL_DESTINATION_CONNECTION_ID | ID_STATELESS_RESET_TOKEN | ID_PREFERRED_ADDRESS
                )
            {
                return Err(QuicError::ProtocolViolation(format!(
                    "client sent server-only transport parameter {id:#x}"
                )));
            }

            match id {
                ID_ORIGINAL_DESTINATION_CONNECTION_ID => {
                    params.original_destination_connection_id = Some(value.to_vec());
                }
                ID_MAX_IDLE_TIMEOUT => params.max_idle_timeout = decode_varint_value(value)?,
                ID_STATELESS_RESET_TOKEN => {
                    let token: [u8; 16] = value
                        .try_into()
                        .map_err(|_| QuicError::ProtocolViolation("stateless_reset_token not 16 bytes".into()))?;
                    params.stateless_reset_token = Some(token);
                }
                ID_MAX_UDP_PAYLOAD_SIZE => params.max_udp_payload_size = decode_varint_value(value)?,
                ID_INITIAL_MAX_DATA => params.initial_max_data = decode_varint_value(value)?,
                ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    params.initial_max_stream_data_bidi_local = decode_varint_value(value)?
                }
                ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    params.initial_max_stream_data_bidi_remote = decode_varint_value(value)?
                }
                ID_INITIAL_MAX_STREAM_DATA_UNI => params.initial_max_stream_data_uni = decode_varint_value(value)?,
                ID_INITIAL_MAX_STREAMS_BIDI => params.initial_max_streams_bidi = decode_varint_value(value)?,
                ID_INITIAL_MAX_STREAMS_UNI => params.initial_max_streams_uni = decode_varint_value(value)?,
                ID_ACK_DELAY_EXPONENT => {
                    let v = decode_varint_value(value)?;
                    if v > 20 {
                        return Err(QuicError::ProtocolViolation("ack_delay_exponent > 20".into()));
                    }
                    params.ack_delay_exponent = v;
                }
                ID_MAX_ACK_DELAY => {
                    let v = decode_varint_value(value)?;
                    if v >= (1 << 14) {
                        return Err(QuicError::ProtocolViolation("max_ack_delay >= 2^14".into()));
                    }
                    params.max_ack_delay = v;
                }
                ID_DISABLE_ACTIVE_MIGRATION => params.disable_active_migration = true,
                ID_PREFERRED_ADDRESS => {
                    // Opaque struct this core never acts on (no migration support);
                    // accept and ignore its contents.
                }
                ID_ACTIVE_CONNECTION_ID_LIMIT => params.active_connection_id_limit = decode_varint_value(value)?,
                _ => {
                    // Unrecognized parameters are ignored per RFC 9000 §7.4.
                }
            }
        }
        Ok(params)
    }
}

fn encode_opaque(out: &mut Vec<u8>, id: u64, value: &[u8]) {
    varint::encode(out, id);
    varint::encode(out, value.len() as u64);
    out.extend_from_slice(value);
}

fn encode_varint_param(out: &mut Vec<u8>, id: u64, value: u64) {
    varint::encode(out, id);
    varint::encode(out, varint::encoded_len(value) as u64);
    varint::encode(out, value);
}

fn decode_varint_value(value: &[u8]) -> Result<u64> {
    let (v, consumed) = varint::decode(value)?;
    if consumed != value.len() {
        return Err(QuicError::ProtocolViolation("transport parameter has trailing bytes".into()));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_roundtrip() {
        let params = TransportParameters::default();
        let encoded = params.encode().unwrap();
        assert!(encoded.len() <= MAX_ENCODED_LEN);
        let decoded = TransportParameters::decode(&encoded, false).unwrap();
        assert_eq!(decoded.max_udp_payload_size, params.max_udp_payload_size);
        assert_eq!(decoded.active_connection_id_limit, params.active_connection_id_limit);
        assert_eq!(decoded.ack_delay_exponent, params.ack_delay_exponent);
    }

    #[test]
    fn client_sending_server_only_param_is_rejected() {
        let mut out = Vec::new();
        encode_opaque(&mut out, ID_ORIGINAL_DESTINATION_CONNECTION_ID, &[1, 2, 3, 4]);
        assert!(TransportParameters::decode(&out, true).is_err());
        assert!(TransportParameters::decode(&out, false).is_ok());
    }

    #[test]
    fn ack_delay_exponent_above_20_is_rejected() {
        let mut out = Vec::new();
        encode_varint_param(&mut out, ID_ACK_DELAY_EXPONENT, 21);
        assert!(TransportParameters::decode(&out, true).is_err());
    }

    #[test]
    fn server_echoes_original_destination_connection_id() {
        let mut params = TransportParameters::default();
        params.original_destination_connection_id = Some(vec![0x83, 0x94, 0xc8, 0xf0]);
        let encoded = params.encode().unwrap();
        let decoded = TransportParameters::decode(&encoded, false).unwrap();
        assert_eq!(decoded.original_destination_connection_id, params.original_destination_connection_id);
    }
}
