//! Discovery wire format: pipe-delimited datagrams to the registry, comma-joined peer lists back.

use std::fmt;

/// Well-known registry UDP port.
pub const REGISTRY_PORT: u16 = 5000;

const FIELD_SEP: char = '|';
const PEER_SEP: char = ',';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    /// `REGISTER|<item>|<address>|<port>`
    Register {
        item: String,
        address: String,
        port: u16,
    },
    /// `UPDATE|<item>|<address>|<port>` (heartbeat)
    Update {
        item: String,
        address: String,
        port: u16,
    },
    /// `QUERY|<item>`
    Query { item: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DiscoveryParseError {
    #[error("message is not valid utf-8")]
    NotUtf8,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("{command} expects {expected} fields, got {got}")]
    FieldCount {
        command: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("empty {0} field")]
    EmptyField(&'static str),
    #[error("address {0:?} contains the peer list separator")]
    InvalidAddress(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{field} contains a separator: {value:?}")]
pub struct DiscoveryEncodeError {
    pub field: &'static str,
    pub value: String,
}

impl DiscoveryMessage {
    pub fn command(&self) -> &'static str {
        match self {
            DiscoveryMessage::Register { .. } => "REGISTER",
            DiscoveryMessage::Update { .. } => "UPDATE",
            DiscoveryMessage::Query { .. } => "QUERY",
        }
    }

    pub fn item(&self) -> &str {
        match self {
            DiscoveryMessage::Register { item, .. }
            | DiscoveryMessage::Update { item, .. }
            | DiscoveryMessage::Query { item } => item,
        }
    }

    /// Wire text for this message. Fails if a field would break the pipe split.
    pub fn encode(&self) -> Result<Vec<u8>, DiscoveryEncodeError> {
        check_field("item", self.item(), &[FIELD_SEP])?;
        let text = match self {
            DiscoveryMessage::Register {
                item,
                address,
                port,
            }
            | DiscoveryMessage::Update {
                item,
                address,
                port,
            } => {
                check_field("address", address, &[FIELD_SEP, PEER_SEP])?;
                format!("{}|{}|{}|{}", self.command(), item, address, port)
            }
            DiscoveryMessage::Query { item } => format!("{}|{}", self.command(), item),
        };
        Ok(text.into_bytes())
    }

    /// Parse one datagram. Strict on field count; the registry drops anything that fails.
    pub fn parse(bytes: &[u8]) -> Result<Self, DiscoveryParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DiscoveryParseError::NotUtf8)?;
        let text = text.trim_end_matches(['\0', '\r', '\n']);
        let parts: Vec<&str> = text.split(FIELD_SEP).collect();
        match parts[0] {
            "REGISTER" => {
                let (item, address, port) = parse_peer_fields("REGISTER", &parts)?;
                Ok(DiscoveryMessage::Register {
                    item,
                    address,
                    port,
                })
            }
            "UPDATE" => {
                let (item, address, port) = parse_peer_fields("UPDATE", &parts)?;
                Ok(DiscoveryMessage::Update {
                    item,
                    address,
                    port,
                })
            }
            "QUERY" => {
                if parts.len() != 2 {
                    return Err(DiscoveryParseError::FieldCount {
                        command: "QUERY",
                        expected: 2,
                        got: parts.len(),
                    });
                }
                if parts[1].is_empty() {
                    return Err(DiscoveryParseError::EmptyField("item"));
                }
                Ok(DiscoveryMessage::Query {
                    item: parts[1].to_string(),
                })
            }
            other => Err(DiscoveryParseError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for DiscoveryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMessage::Register {
                item,
                address,
                port,
            }
            | DiscoveryMessage::Update {
                item,
                address,
                port,
            } => write!(f, "{} {} from {}:{}", self.command(), item, address, port),
            DiscoveryMessage::Query { item } => write!(f, "QUERY {}", item),
        }
    }
}

fn check_field(
    field: &'static str,
    value: &str,
    separators: &[char],
) -> Result<(), DiscoveryEncodeError> {
    if value.contains(separators) {
        return Err(DiscoveryEncodeError {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_peer_fields(
    command: &'static str,
    parts: &[&str],
) -> Result<(String, String, u16), DiscoveryParseError> {
    if parts.len() != 4 {
        return Err(DiscoveryParseError::FieldCount {
            command,
            expected: 4,
            got: parts.len(),
        });
    }
    if parts[1].is_empty() {
        return Err(DiscoveryParseError::EmptyField("item"));
    }
    if parts[2].is_empty() {
        return Err(DiscoveryParseError::EmptyField("address"));
    }
    // the address is echoed back inside a comma-joined peer list
    if parts[2].contains(PEER_SEP) {
        return Err(DiscoveryParseError::InvalidAddress(parts[2].to_string()));
    }
    let port = parts[3]
        .trim()
        .parse::<u16>()
        .map_err(|_| DiscoveryParseError::InvalidPort(parts[3].to_string()))?;
    Ok((parts[1].to_string(), parts[2].to_string(), port))
}

/// A source endpoint as returned by a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub address: String,
    pub port: u16,
}

impl PeerAddr {
    /// Parse `address:port`; the port is the text after the last colon.
    pub fn parse(s: &str) -> Option<Self> {
        let (address, port) = s.trim().rsplit_once(':')?;
        if address.is_empty() {
            return None;
        }
        let port = port.parse::<u16>().ok()?;
        Some(PeerAddr {
            address: address.to_string(),
            port,
        })
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Query response payload: comma-joined endpoints, possibly empty.
pub fn encode_peer_list<S: AsRef<str>>(peers: &[S]) -> Vec<u8> {
    peers
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(PEER_SEP.to_string().as_str())
        .into_bytes()
}

/// Parse a query response. Empty payload means zero sources; bad entries are skipped.
pub fn parse_peer_list(bytes: &[u8]) -> Vec<PeerAddr> {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches('\0')
        .split(PEER_SEP)
        .filter(|s| !s.trim().is_empty())
        .filter_map(PeerAddr::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_register() {
        let msg = DiscoveryMessage::Register {
            item: "song.mp3".into(),
            address: "192.168.1.4".into(),
            port: 7000,
        };
        assert_eq!(msg.encode().unwrap(), b"REGISTER|song.mp3|192.168.1.4|7000");
    }

    #[test]
    fn encode_query() {
        let msg = DiscoveryMessage::Query {
            item: "song.mp3".into(),
        };
        assert_eq!(msg.encode().unwrap(), b"QUERY|song.mp3");
    }

    #[test]
    fn encode_rejects_pipe_in_item() {
        let msg = DiscoveryMessage::Query {
            item: "a|b".into(),
        };
        assert_eq!(msg.encode().unwrap_err().field, "item");
    }

    #[test]
    fn comma_in_address_is_rejected() {
        let msg = DiscoveryMessage::Register {
            item: "f.bin".into(),
            address: "a,b".into(),
            port: 1,
        };
        assert_eq!(msg.encode().unwrap_err().field, "address");
        assert_eq!(
            DiscoveryMessage::parse(b"REGISTER|f.bin|a,b|1"),
            Err(DiscoveryParseError::InvalidAddress("a,b".into()))
        );
        assert!(matches!(
            DiscoveryMessage::parse(b"UPDATE|f.bin|a,b|1"),
            Err(DiscoveryParseError::InvalidAddress(_))
        ));
        // commas are fine in item names
        assert!(DiscoveryMessage::parse(b"REGISTER|a,b.bin|10.0.0.1|1").is_ok());
    }

    #[test]
    fn parse_update() {
        let msg = DiscoveryMessage::parse(b"UPDATE|f.bin|10.0.0.2|6001").unwrap();
        assert_eq!(
            msg,
            DiscoveryMessage::Update {
                item: "f.bin".into(),
                address: "10.0.0.2".into(),
                port: 6001,
            }
        );
    }

    #[test]
    fn parse_trims_trailing_nul_and_newline() {
        let msg = DiscoveryMessage::parse(b"QUERY|f.bin\n\0\0").unwrap();
        assert_eq!(msg.item(), "f.bin");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(matches!(
            DiscoveryMessage::parse(b"REGISTER|f.bin|10.0.0.2"),
            Err(DiscoveryParseError::FieldCount { got: 3, .. })
        ));
        assert!(matches!(
            DiscoveryMessage::parse(b"REGISTER|f.bin|10.0.0.2|6001|x"),
            Err(DiscoveryParseError::FieldCount { got: 5, .. })
        ));
        assert!(matches!(
            DiscoveryMessage::parse(b"UPDATE|f.bin|10.0.0.2|port"),
            Err(DiscoveryParseError::InvalidPort(_))
        ));
        assert!(matches!(
            DiscoveryMessage::parse(b"UPDATE|f.bin|10.0.0.2|70000"),
            Err(DiscoveryParseError::InvalidPort(_))
        ));
        assert!(matches!(
            DiscoveryMessage::parse(b"QUERY"),
            Err(DiscoveryParseError::FieldCount { .. })
        ));
        assert!(matches!(
            DiscoveryMessage::parse(b"QUERY|"),
            Err(DiscoveryParseError::EmptyField("item"))
        ));
        assert!(matches!(
            DiscoveryMessage::parse(b"register|f|a|1"),
            Err(DiscoveryParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            DiscoveryMessage::parse(b""),
            Err(DiscoveryParseError::UnknownCommand(_))
        ));
        assert_eq!(
            DiscoveryMessage::parse(&[0xff, 0xfe]),
            Err(DiscoveryParseError::NotUtf8)
        );
    }

    #[test]
    fn peer_list_empty_payload_is_no_sources() {
        assert!(parse_peer_list(b"").is_empty());
        assert!(parse_peer_list(b"\0\0\0").is_empty());
        assert!(encode_peer_list::<String>(&[]).is_empty());
    }

    #[test]
    fn peer_list_parses_entries() {
        let payload = encode_peer_list(&["10.0.0.1:6000", "host.lan:6001"]);
        assert_eq!(payload, b"10.0.0.1:6000,host.lan:6001");
        let peers = parse_peer_list(&payload);
        assert_eq!(
            peers,
            vec![
                PeerAddr {
                    address: "10.0.0.1".into(),
                    port: 6000
                },
                PeerAddr {
                    address: "host.lan".into(),
                    port: 6001
                },
            ]
        );
    }

    #[test]
    fn peer_list_skips_bad_entries() {
        let peers = parse_peer_list(b"10.0.0.1:6000,garbage,:12,10.0.0.2:notaport,10.0.0.3:1");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].to_string(), "10.0.0.3:1");
    }
}
