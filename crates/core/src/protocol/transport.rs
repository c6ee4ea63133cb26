//! `Transport` header grammar (RFC 2326 §12.39).
//!
//! ```text
//! Transport: RTP/AVP[/TCP];param[=value];param[=value]...
//! ```
//!
//! `port` and `client_port` carry a two-element port pair encoded as
//! `name=lo-hi`; a single-port form (`port=5004`) fills both slots. All
//! other parameters pass through as free-form values or bare flags.

use crate::error::{DecodeErrorKind, Result, RtspError};
use crate::protocol::transport_param as param;

/// Delivery protocol negotiated by the `Transport` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProto {
    Udp,
    Tcp,
}

/// One `Transport` parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportParam {
    /// Two-element port pair (`port`, `client_port`). Always holds two
    /// integers even when only one port is meaningful.
    Ports([u16; 2]),
    /// Free-form `name=value` parameter.
    Value(String),
    /// Bare `name` presence flag (also produced by an empty `name=`).
    Flag,
}

/// Parameter names that decode to a port pair.
const PORT_PAIR_NAMES: [&str; 2] = [param::PORT, param::CLIENT_PORT];

/// A decoded or locally built `Transport` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSpec {
    pub proto: TransportProto,
    params: Vec<(String, TransportParam)>,
}

impl TransportSpec {
    pub fn new(proto: TransportProto) -> Self {
        TransportSpec {
            proto,
            params: Vec::new(),
        }
    }

    /// Parse a `Transport` header value.
    ///
    /// Fails with [`DecodeErrorKind::BadTransportValue`] carrying the raw
    /// string on any grammar violation.
    pub fn decode(value: &str) -> Result<Self> {
        let bad = || RtspError::decode(DecodeErrorKind::BadTransportValue(value.to_string()));

        let rest = value.strip_prefix("RTP/AVP").ok_or_else(bad)?;
        let (proto, rest) = if let Some(rest) = rest.strip_prefix("/TCP") {
            (TransportProto::Tcp, rest)
        } else if let Some(rest) = rest.strip_prefix("/UDP") {
            (TransportProto::Udp, rest)
        } else {
            (TransportProto::Udp, rest)
        };
        if !rest.is_empty() && !rest.starts_with(';') {
            return Err(bad());
        }

        let mut spec = TransportSpec::new(proto);
        for segment in rest.split(';') {
            if segment.is_empty() {
                continue;
            }
            let (name, param_value) = match segment.split_once('=') {
                Some((name, param_value)) => (name, Some(param_value)),
                None => (segment, None),
            };
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(bad());
            }

            let decoded = if PORT_PAIR_NAMES.contains(&name) {
                let ports = param_value.ok_or_else(bad)?;
                Self::decode_port_pair(ports).ok_or_else(bad)?
            } else {
                match param_value {
                    Some("") | None => TransportParam::Flag,
                    Some(v) => TransportParam::Value(v.to_string()),
                }
            };
            spec.params.push((name.to_string(), decoded));
        }
        Ok(spec)
    }

    /// `lo-hi` or a single port duplicated into both slots.
    fn decode_port_pair(value: &str) -> Option<TransportParam> {
        let pair = match value.split_once('-') {
            Some((lo, hi)) => [lo.parse().ok()?, hi.parse().ok()?],
            None => {
                let port = value.parse().ok()?;
                [port, port]
            }
        };
        Some(TransportParam::Ports(pair))
    }

    /// Serialize to the header wire form.
    pub fn encode(&self) -> String {
        let mut out = String::from(match self.proto {
            TransportProto::Udp => "RTP/AVP",
            TransportProto::Tcp => "RTP/AVP/TCP",
        });
        for (name, value) in &self.params {
            match value {
                TransportParam::Ports([lo, hi]) => {
                    out.push_str(&format!(";{name}={lo}-{hi}"));
                }
                TransportParam::Value(v) => {
                    out.push_str(&format!(";{name}={v}"));
                }
                TransportParam::Flag => {
                    out.push_str(&format!(";{name}"));
                }
            }
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<&TransportParam> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn set_flag(&mut self, name: &str) {
        self.set(name, TransportParam::Flag);
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<String>) {
        self.set(name, TransportParam::Value(value.into()));
    }

    pub fn set_ports(&mut self, name: &str, ports: [u16; 2]) {
        self.set(name, TransportParam::Ports(ports));
    }

    fn set(&mut self, name: &str, value: TransportParam) {
        match self.params.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => self.params.push((name.to_string(), value)),
        }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Unicast and multicast are mutually exclusive; absence of both is
    /// treated as unicast by the server.
    pub fn is_multicast(&self) -> bool {
        self.get(param::MULTICAST).is_some()
    }

    pub fn destination(&self) -> Option<&str> {
        match self.get(param::DESTINATION) {
            Some(TransportParam::Value(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn ttl(&self) -> Option<u8> {
        match self.get(param::TTL) {
            Some(TransportParam::Value(v)) => v.parse().ok(),
            _ => None,
        }
    }

    /// Requested port pair: `client_port` takes precedence over `port`.
    pub fn requested_ports(&self) -> Option<[u16; 2]> {
        for name in [param::CLIENT_PORT, param::PORT] {
            if let Some(TransportParam::Ports(pair)) = self.get(name) {
                return Some(*pair);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_rtp_avp_is_udp_no_params() {
        let spec = TransportSpec::decode("RTP/AVP").unwrap();
        assert_eq!(spec.proto, TransportProto::Udp);
        assert_eq!(spec.param_count(), 0);
    }

    #[test]
    fn multicast_flag_param() {
        let spec = TransportSpec::decode("RTP/AVP;multicast").unwrap();
        assert_eq!(spec.param_count(), 1);
        assert_eq!(spec.get("multicast"), Some(&TransportParam::Flag));
        assert!(spec.is_multicast());
    }

    #[test]
    fn single_port_duplicates_into_pair() {
        let spec = TransportSpec::decode("RTP/AVP;port=3456").unwrap();
        assert_eq!(spec.get("port"), Some(&TransportParam::Ports([3456, 3456])));
    }

    #[test]
    fn port_range_form() {
        let spec = TransportSpec::decode("RTP/AVP;port=3456-3457").unwrap();
        assert_eq!(spec.get("port"), Some(&TransportParam::Ports([3456, 3457])));
    }

    #[test]
    fn tcp_proto_with_params() {
        let spec = TransportSpec::decode("RTP/AVP/TCP;client_port=3456-3457;mode=\"PLAY\"").unwrap();
        assert_eq!(spec.proto, TransportProto::Tcp);
        assert_eq!(spec.param_count(), 2);
        assert_eq!(spec.requested_ports(), Some([3456, 3457]));
        assert_eq!(
            spec.get("mode"),
            Some(&TransportParam::Value("\"PLAY\"".to_string()))
        );
    }

    #[test]
    fn udp_suffix_accepted() {
        let spec = TransportSpec::decode("RTP/AVP/UDP;unicast").unwrap();
        assert_eq!(spec.proto, TransportProto::Udp);
    }

    #[test]
    fn destination_and_ttl_accessors() {
        let spec =
            TransportSpec::decode("RTP/AVP;multicast;destination=224.1.2.3;ttl=16").unwrap();
        assert_eq!(spec.destination(), Some("224.1.2.3"));
        assert_eq!(spec.ttl(), Some(16));
    }

    #[test]
    fn malformed_values_rejected() {
        for input in ["", "blah blah", "RTP/AVP;port=abc", "RTP/AVP;bad param", "RTP/AVPx"] {
            let err = TransportSpec::decode(input).unwrap_err();
            let RtspError::Decode {
                kind: DecodeErrorKind::BadTransportValue(raw),
            } = err
            else {
                panic!("unexpected error for {input:?}: {err}");
            };
            assert_eq!(raw, input);
        }
    }

    #[test]
    fn encode_round_trip() {
        let mut spec = TransportSpec::new(TransportProto::Udp);
        spec.set_flag("unicast");
        spec.set_value("destination", "10.0.0.5");
        spec.set_ports("client_port", [5004, 5005]);
        spec.set_value("ttl", "64");
        let encoded = spec.encode();
        assert_eq!(
            encoded,
            "RTP/AVP;unicast;destination=10.0.0.5;client_port=5004-5005;ttl=64"
        );
        assert_eq!(TransportSpec::decode(&encoded).unwrap(), spec);
    }
}
