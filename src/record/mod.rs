//! Records produced from received data

mod escape;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column names in output order
pub const FIELDS: [&str; 8] = [
    "client_id",
    "client_ip",
    "client_port",
    "listen_host",
    "listen_port",
    "data_hex",
    "data_decode",
    "timestamp",
];

/// One read event from one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub client_id: String,
    pub client_ip: String,
    pub client_port: u16,
    pub listen_host: String,
    pub listen_port: u16,
    pub data_hex: String,
    pub data_decode: String,
    pub timestamp: i64,
}

impl Record {
    /// Build a record from raw bytes received on `listen_host:listen_port`.
    ///
    /// Never fails: a text rendering error leaves `data_decode` empty, and a
    /// `client_id` that does not end in `:<port>` keeps the whole id as the ip
    /// with port 0. The current time is used when `timestamp` is `None`.
    pub fn build(
        client_id: &str,
        data: &[u8],
        listen_host: &str,
        listen_port: u16,
        timestamp: Option<i64>,
    ) -> Self {
        let (client_ip, client_port) = split_client_id(client_id);
        let data_decode = escape::render(data).unwrap_or_default();

        Self {
            client_id: client_id.to_string(),
            client_ip: client_ip.to_string(),
            client_port,
            listen_host: listen_host.to_string(),
            listen_port,
            data_hex: hex::encode(data),
            data_decode,
            timestamp: timestamp.unwrap_or_else(|| Utc::now().timestamp()),
        }
    }
}

/// Split `"<ip>:<port>"` on the last separator
fn split_client_id(client_id: &str) -> (&str, u16) {
    match client_id.rsplit_once(':') {
        Some((ip, port)) => match port.parse() {
            Ok(port) => (ip, port),
            Err(_) => (client_id, 0),
        },
        None => (client_id, 0),
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "client_id: {}, client_ip: {}, client_port: {}, listen_host: {}, listen_port: {}, \
             data_hex: {}, data_decode: {}, timestamp: {}",
            self.client_id,
            self.client_ip,
            self.client_port,
            self.listen_host,
            self.listen_port,
            self.data_hex,
            self.data_decode,
            self.timestamp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_splits_client_id() {
        let record = Record::build("127.0.0.1:51234", b"\x01\x02", "0.0.0.0", 9000, Some(42));

        assert_eq!(record.client_id, "127.0.0.1:51234");
        assert_eq!(record.client_ip, "127.0.0.1");
        assert_eq!(record.client_port, 51234);
        assert_eq!(record.listen_host, "0.0.0.0");
        assert_eq!(record.listen_port, 9000);
        assert_eq!(record.data_hex, "0102");
        assert_eq!(record.timestamp, 42);
    }

    #[test]
    fn test_build_ipv6_client_id_uses_last_separator() {
        let record = Record::build("::1:40000", b"x", "::", 22, Some(0));

        assert_eq!(record.client_ip, "::1");
        assert_eq!(record.client_port, 40000);
        assert_eq!(record.timestamp, 0);
    }

    #[test]
    fn test_build_malformed_client_id() {
        let record = Record::build("localhost", b"x", "0.0.0.0", 22, Some(1));
        assert_eq!(record.client_ip, "localhost");
        assert_eq!(record.client_port, 0);

        let record = Record::build("host:notaport", b"x", "0.0.0.0", 22, Some(1));
        assert_eq!(record.client_ip, "host:notaport");
        assert_eq!(record.client_port, 0);
    }

    #[test]
    fn test_build_captures_current_time() {
        let before = Utc::now().timestamp();
        let record = Record::build("10.0.0.1:1", b"GET /", "0.0.0.0", 80, None);
        let after = Utc::now().timestamp();

        assert!(record.timestamp >= before && record.timestamp <= after);
    }

    #[test]
    fn test_hex_is_lowercase_and_double_length() {
        let inputs: [&[u8]; 4] = [b"", b"\xff\xfe", b"\\x4", &[0xAB; 300]];
        for data in inputs {
            let record = Record::build("10.0.0.1:1", data, "0.0.0.0", 80, Some(1));
            assert_eq!(record.data_hex.len(), data.len() * 2);
            assert_eq!(record.data_hex, record.data_hex.to_lowercase());
        }
    }

    #[test]
    fn test_build_never_fails_on_invalid_input() {
        let data = b"\\u12\\U0011ffff\\N{nope\xc3\x28\\";
        let record = Record::build("10.0.0.1:1", data, "0.0.0.0", 80, Some(1));

        assert_eq!(record.data_hex, hex::encode(data));
        assert!(record.data_decode.starts_with('\''));
    }

    #[test]
    fn test_display_lists_fields_in_order() {
        let record = Record::build("127.0.0.1:5", b"hi", "0.0.0.0", 23, Some(7));
        let line = record.to_string();

        assert_eq!(
            line,
            "client_id: 127.0.0.1:5, client_ip: 127.0.0.1, client_port: 5, listen_host: 0.0.0.0, \
             listen_port: 23, data_hex: 6869, data_decode: 'hi', timestamp: 7"
        );

        let mut last = 0;
        for field in FIELDS {
            let pos = line.find(&format!("{}: ", field)).unwrap();
            assert!(pos >= last);
            last = pos;
        }
    }
}
