//! Base types and formatting helpers to interact with SCPI-based instruments.

use crate::Error;

pub const DEFAULT_TERMINATION: &str = "\n";

/// Maximum distance of the `#` marker from the start of a reply before we stop looking for it.
const DEFAULT_LENGTH_BEFORE_BLOCK: usize = 25;

#[derive(Clone, Debug, PartialEq)]
pub enum ScpiRequest {
    Write(String),
    QueryString(String),
    ReadString,
    ReadRaw,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScpiResponse {
    Done,
    String(String),
    Binary(Vec<u8>),
}

/// Format a physical quantity as `%e` does: six decimals and a signed, two digit exponent.
///
/// `0.005` becomes `5.000000e-03`.
pub fn format_sci(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let formatted = format!("{:.6e}", value);
    let (mantissa, exponent) = match formatted.split_once('e') {
        Some(x) => x,
        None => return formatted,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mantissa, sign, exponent.abs())
}

/// Format a setpoint in plain decimal notation without trailing zeros:
/// `24` -> `24`, `1.5` -> `1.5`.
pub fn format_plain(value: f64) -> String {
    format!("{}", value)
}

/// Format a float the way Python's `str()` does for ordinary magnitudes: `1.0` stays `1.0`.
pub fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

/// Remove the line termination the instrument appends to its replies.
pub fn strip_termination(reply: &str) -> &str {
    reply.trim_end_matches(|c| c == '\n' || c == '\r')
}

/// Parse a numeric reply such as `+2.400000E+01\n`.
pub fn parse_number(reply: &str) -> crate::Result<f64> {
    let trimmed = reply.trim();
    trimmed
        .parse::<f64>()
        .map_err(|_| Error::unexpected_response(trimmed))
}

/// Parse an SCPI binary header.
///
/// Returns the offset of the payload and its length within `rx`.
pub fn parse_binary_header(rx: &[u8]) -> crate::Result<(usize, usize)> {
    let begin = rx
        .iter()
        .position(|x| *x == b'#')
        .ok_or_else(Error::invalid_binary_header)?;

    if begin > DEFAULT_LENGTH_BEFORE_BLOCK {
        return Err(Error::invalid_binary_header());
    }
    let header_length = if rx.len() < begin + 2 {
        0
    } else {
        let data = String::from_utf8(vec![rx[begin + 1]])
            .map_err(|_| Error::invalid_binary_header())?;
        data.parse::<usize>()
            .map_err(|_| Error::invalid_binary_header())?
    };
    let offset = begin + 2 + header_length;
    if offset > rx.len() {
        return Err(Error::invalid_binary_header());
    }
    let data_length = if header_length > 0 {
        let x: Vec<_> = rx[begin + 2..offset].to_vec();
        let data = String::from_utf8(x).map_err(|_| Error::invalid_binary_header())?;
        data.parse::<usize>()
            .map_err(|_| Error::invalid_binary_header())?
    } else {
        0
    };
    if offset + data_length > rx.len() {
        Err(Error::invalid_binary_header())
    } else {
        Ok((offset, data_length))
    }
}

/// Payload of a block, without header and trailing termination.
///
/// An indefinite length block (`#0`) runs up to the termination.
pub fn block_payload(rx: &[u8]) -> crate::Result<&[u8]> {
    let (offset, length) = parse_binary_header(rx)?;
    if rx[offset - 2..offset] == *b"#0" {
        let end = rx[offset..]
            .iter()
            .rposition(|x| *x != b'\n' && *x != b'\r')
            .map_or(offset, |x| offset + x + 1);
        return Ok(&rx[offset..end]);
    }
    Ok(&rx[offset..offset + length])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sci_notation() {
        assert_eq!(format_sci(0.005), "5.000000e-03");
        assert_eq!(format_sci(0.001), "1.000000e-03");
        assert_eq!(format_sci(0.0), "0.000000e+00");
        assert_eq!(format_sci(4.0), "4.000000e+00");
        assert_eq!(format_sci(-1.5), "-1.500000e+00");
        assert_eq!(format_sci(2.5e-10), "2.500000e-10");
        assert_eq!(format_sci(1e100), "1.000000e+100");
    }

    #[test]
    fn plain_notation() {
        assert_eq!(format_plain(24.0), "24");
        assert_eq!(format_plain(1.5), "1.5");
        assert_eq!(format_plain(0.25), "0.25");
    }

    #[test]
    fn float_notation() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(-0.2), "-0.2");
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("+2.400000E+01\n").unwrap(), 24.0);
        assert_eq!(parse_number("1.500").unwrap(), 1.5);
        assert!(matches!(
            parse_number("ERROR"),
            Err(Error::Protocol(crate::ProtocolError::UnexpectedResponse(x))) if x == "ERROR"
        ));
    }

    #[test]
    fn binary_header() {
        let rx = b"#15hello\n";
        assert_eq!(parse_binary_header(rx).unwrap(), (3, 5));
        assert_eq!(block_payload(rx).unwrap(), b"hello");

        let rx = b"#800000003abc";
        assert_eq!(block_payload(rx).unwrap(), b"abc");
    }

    #[test]
    fn indefinite_block() {
        assert_eq!(block_payload(b"#0+1.0,-2.5\n").unwrap(), b"+1.0,-2.5");
        assert_eq!(block_payload(b"#0\r\n").unwrap(), b"");
        assert_eq!(block_payload(b"#10").unwrap(), b"");
    }

    #[test]
    fn truncated_binary_header() {
        assert!(parse_binary_header(b"#19abc").is_err());
        assert!(parse_binary_header(b"no block here").is_err());
        assert!(parse_binary_header(b"#8000").is_err());
    }

    #[test]
    fn termination() {
        assert_eq!(strip_termination("1.0\r\n"), "1.0");
        assert_eq!(strip_termination("1.0"), "1.0");
    }
}
