//! Discovery collaborator types

use crate::registry::ActiveSource;

/// One network endpoint reported by a device
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    /// `host` or `host:port`
    pub fn address(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

/// Device descriptor returned by one discovery round
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub hostname: String,
    /// Endpoints in the order the device reported them
    pub endpoints: Vec<Endpoint>,
    pub active_source: ActiveSource,
}

impl DeviceDescriptor {
    /// Probe address derived from the first reported endpoint. `None` when
    /// the device reported no endpoints at all; such descriptors are logged
    /// and excluded from the reconciliation run.
    pub fn probe_address(&self) -> Option<String> {
        self.endpoints.first().map(Endpoint::address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_address_uses_first_endpoint() {
        let device = DeviceDescriptor {
            hostname: "cam1".to_string(),
            endpoints: vec![
                Endpoint {
                    host: "192.168.1.10".to_string(),
                    port: Some(8080),
                },
                Endpoint {
                    host: "10.0.0.10".to_string(),
                    port: None,
                },
            ],
            active_source: ActiveSource::default(),
        };
        assert_eq!(device.probe_address(), Some("192.168.1.10:8080".to_string()));
    }

    #[test]
    fn probe_address_without_port() {
        let device = DeviceDescriptor {
            hostname: "cam1".to_string(),
            endpoints: vec![Endpoint {
                host: "192.168.1.10".to_string(),
                port: None,
            }],
            active_source: ActiveSource::default(),
        };
        assert_eq!(device.probe_address(), Some("192.168.1.10".to_string()));
    }

    #[test]
    fn no_endpoints_means_no_probe_address() {
        let device = DeviceDescriptor {
            hostname: "cam1".to_string(),
            endpoints: vec![],
            active_source: ActiveSource::default(),
        };
        assert_eq!(device.probe_address(), None);
    }
}
