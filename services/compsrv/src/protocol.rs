//! Modbus TCP wire codec
//!
//! Builds and parses the two PDUs the compressor controller speaks (read
//! registers, write single register) plus the MBAP framing around them.
//! Pure functions over byte slices; all I/O lives in the session layer.
//!
//! Exception responses echo the request function code with the high bit
//! set. The controller is not strict about echoing the exact code - a
//! rejected remote command comes back with bit 0x10 set in the code - so
//! parsing accepts any code with the error bit and reports the stripped
//! value verbatim.

use crate::error::{CompSrvError, Result};

/// Read registers function code
pub const FC_READ_REGISTERS: u8 = 0x04;
/// Write single register function code
pub const FC_WRITE_REGISTER: u8 = 0x06;
/// Error bit in a response function code
const EXCEPTION_BIT: u8 = 0x80;

/// MBAP header length: transaction id, protocol id, length, unit id
pub const MBAP_HEADER_LEN: usize = 7;
/// Protocol identifier for Modbus TCP
const PROTOCOL_ID: u16 = 0;

/// Parsed response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePdu {
    /// Register values from a read
    Registers(Vec<u16>),
    /// Echo of a successful single-register write
    WriteEcho { address: u16, value: u16 },
    /// Device exception response
    Exception { original_code: u8, exception_code: u8 },
}

/// Build a read-registers request PDU
pub fn read_request(address: u16, count: u16) -> Vec<u8> {
    vec![
        FC_READ_REGISTERS,
        (address >> 8) as u8,
        (address & 0xFF) as u8,
        (count >> 8) as u8,
        (count & 0xFF) as u8,
    ]
}

/// Build a write-single-register request PDU
pub fn write_request(address: u16, value: u16) -> Vec<u8> {
    vec![
        FC_WRITE_REGISTER,
        (address >> 8) as u8,
        (address & 0xFF) as u8,
        (value >> 8) as u8,
        (value & 0xFF) as u8,
    ]
}

/// Wrap a PDU in an MBAP header
pub fn frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16; // unit id + PDU
    let mut out = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    out.extend_from_slice(&transaction_id.to_be_bytes());
    out.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.push(unit_id);
    out.extend_from_slice(pdu);
    out
}

/// Parse an MBAP header, returning (transaction id, unit id, PDU length)
pub fn parse_mbap(header: &[u8; MBAP_HEADER_LEN]) -> Result<(u16, u8, usize)> {
    let transaction_id = u16::from_be_bytes([header[0], header[1]]);
    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let unit_id = header[6];

    if protocol_id != PROTOCOL_ID {
        return Err(CompSrvError::Transport(format!(
            "unexpected MBAP protocol id {protocol_id}"
        )));
    }
    if length < 2 {
        return Err(CompSrvError::Transport(format!(
            "MBAP length {length} too short for a PDU"
        )));
    }
    Ok((transaction_id, unit_id, length - 1))
}

/// Parse a response PDU
pub fn parse_response(pdu: &[u8]) -> Result<ResponsePdu> {
    let function_code = *pdu
        .first()
        .ok_or_else(|| CompSrvError::Transport("empty response PDU".to_string()))?;

    if function_code & EXCEPTION_BIT != 0 {
        let exception_code = *pdu.get(1).ok_or_else(|| {
            CompSrvError::Transport("truncated exception response".to_string())
        })?;
        return Ok(ResponsePdu::Exception {
            original_code: function_code & !EXCEPTION_BIT,
            exception_code,
        });
    }

    match function_code {
        FC_READ_REGISTERS => {
            let byte_count = *pdu.get(1).ok_or_else(|| {
                CompSrvError::Transport("truncated read response".to_string())
            })? as usize;
            let data = &pdu[2..];
            if data.len() != byte_count || byte_count % 2 != 0 {
                return Err(CompSrvError::Transport(format!(
                    "read response byte count mismatch: declared {byte_count}, got {}",
                    data.len()
                )));
            }
            let words = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(ResponsePdu::Registers(words))
        }
        FC_WRITE_REGISTER => {
            if pdu.len() != 5 {
                return Err(CompSrvError::Transport(format!(
                    "write echo has {} bytes, expected 5",
                    pdu.len()
                )));
            }
            Ok(ResponsePdu::WriteEcho {
                address: u16::from_be_bytes([pdu[1], pdu[2]]),
                value: u16::from_be_bytes([pdu[3], pdu[4]]),
            })
        }
        other => Err(CompSrvError::Transport(format!(
            "unexpected function code 0x{other:02X} in response"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() {
        assert_eq!(read_request(0x0030, 3), vec![0x04, 0x00, 0x30, 0x00, 0x03]);
        assert_eq!(
            read_request(0x00C7, 23),
            vec![0x04, 0x00, 0xC7, 0x00, 0x17]
        );
    }

    #[test]
    fn write_request_layout() {
        assert_eq!(
            write_request(0x012B, 0xFF01),
            vec![0x06, 0x01, 0x2B, 0xFF, 0x01]
        );
    }

    #[test]
    fn frame_round_trip() {
        let pdu = read_request(0x1E, 1);
        let framed = frame(0x1234, 7, &pdu);
        assert_eq!(framed.len(), MBAP_HEADER_LEN + pdu.len());

        let mut header = [0u8; MBAP_HEADER_LEN];
        header.copy_from_slice(&framed[..MBAP_HEADER_LEN]);
        let (txn, unit, pdu_len) = parse_mbap(&header).expect("valid header");
        assert_eq!(txn, 0x1234);
        assert_eq!(unit, 7);
        assert_eq!(pdu_len, pdu.len());
        assert_eq!(&framed[MBAP_HEADER_LEN..], &pdu[..]);
    }

    #[test]
    fn parse_read_response() {
        // 3 registers: 0x0001, 0x0000, 0x0001
        let pdu = [0x04, 6, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(
            parse_response(&pdu).expect("valid"),
            ResponsePdu::Registers(vec![1, 0, 1])
        );
    }

    #[test]
    fn parse_write_echo() {
        let pdu = [0x06, 0x01, 0x2D, 0xFF, 0x01];
        assert_eq!(
            parse_response(&pdu).expect("valid"),
            ResponsePdu::WriteEcho {
                address: 0x12D,
                value: 0xFF01
            }
        );
    }

    #[test]
    fn parse_exception_strips_error_bit() {
        let pdu = [0x84, 0x02];
        assert_eq!(
            parse_response(&pdu).expect("valid"),
            ResponsePdu::Exception {
                original_code: 4,
                exception_code: 2
            }
        );
    }

    #[test]
    fn parse_nonstandard_exception_code() {
        // Remote command rejected: controller sets bit 0x10 in the code
        let pdu = [0x90, 0x01];
        assert_eq!(
            parse_response(&pdu).expect("valid"),
            ResponsePdu::Exception {
                original_code: 0x10,
                exception_code: 1
            }
        );
    }

    #[test]
    fn malformed_responses_rejected() {
        assert!(parse_response(&[]).is_err());
        assert!(parse_response(&[0x84]).is_err());
        assert!(parse_response(&[0x04, 4, 0x00, 0x01]).is_err());
        assert!(parse_response(&[0x03, 2, 0x00, 0x01]).is_err());
    }

    #[test]
    fn bad_mbap_rejected() {
        // Wrong protocol id
        let header = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01];
        assert!(parse_mbap(&header).is_err());
        // Length too short to hold a PDU
        let header = [0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01];
        assert!(parse_mbap(&header).is_err());
    }
}
