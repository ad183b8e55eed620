//! ONVIF implementations of the discovery collaborators
//!
//! Discovery is WS-Discovery over UDP multicast (239.255.255.250:3702);
//! matched devices are enriched with their first media profile via a SOAP
//! GetProfiles call. Stream addresses come from GetStreamUri (RTSP).
//!
//! XML handling is namespace-agnostic string extraction; ONVIF devices
//! disagree wildly on prefixes, so full XML parsing buys nothing here.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::types::{DeviceDescriptor, Endpoint};
use super::{Discovery, StreamLookup};
use crate::error::{Error, Result};
use crate::registry::{ActiveSource, Resolution};

const WS_DISCOVERY_ADDR: &str = "239.255.255.250:3702";

fn probe_message(message_id: &uuid::Uuid) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope" xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <e:Header>
    <w:MessageID>uuid:{message_id}</w:MessageID>
    <w:To e:mustUnderstand="true">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>
    <w:Action e:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>
  </e:Header>
  <e:Body>
    <d:Probe>
      <d:Types>dn:NetworkVideoTransmitter</d:Types>
    </d:Probe>
  </e:Body>
</e:Envelope>"#
    )
}

const GET_PROFILES_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
<s:Body><GetProfiles xmlns="http://www.onvif.org/ver10/media/wsdl"/></s:Body>
</s:Envelope>"#;

/// Extract the text content of a tag, with or without a namespace prefix
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let patterns = [format!(":{tag}>"), format!("<{tag}>")];
    for pattern in &patterns {
        if let Some(start) = xml.find(pattern.as_str()) {
            let content_start = start + pattern.len();
            if let Some(end) = xml[content_start..].find("</") {
                let value = xml[content_start..content_start + end].trim().to_string();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Extract an attribute value from the first occurrence of a tag
fn extract_xml_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let patterns = [format!("<{tag} "), format!(":{tag} ")];
    for pattern in &patterns {
        if let Some(start) = xml.find(pattern.as_str()) {
            let after = &xml[start..];
            let tag_end = after.find('>')?;
            let tag_content = &after[..tag_end];
            let attr_pattern = format!("{attr}=\"");
            if let Some(attr_start) = tag_content.find(attr_pattern.as_str()) {
                let value = &tag_content[attr_start + attr_pattern.len()..];
                if let Some(end) = value.find('"') {
                    return Some(value[..end].to_string());
                }
            }
        }
    }
    None
}

/// Parse one XAddr URL ("http://192.168.1.10:8080/onvif/device_service")
/// into an endpoint
fn parse_xaddr(xaddr: &str) -> Option<Endpoint> {
    let rest = xaddr
        .strip_prefix("http://")
        .or_else(|| xaddr.strip_prefix("https://"))?;
    let authority = rest.split('/').next()?;
    if authority.is_empty() {
        return None;
    }
    match authority.split_once(':') {
        Some((host, port)) => Some(Endpoint {
            host: host.to_string(),
            port: port.parse().ok(),
        }),
        None => Some(Endpoint {
            host: authority.to_string(),
            port: None,
        }),
    }
}

/// Device name from the ONVIF scopes list
/// (`onvif://www.onvif.org/name/CamName`)
fn hostname_from_scopes(scopes: &str) -> Option<String> {
    for scope in scopes.split_whitespace() {
        if let Some(name) = scope.strip_prefix("onvif://www.onvif.org/name/") {
            if !name.is_empty() {
                return Some(name.replace("%20", " "));
            }
        }
    }
    None
}

/// WS-Discovery based device discovery
pub struct OnvifDiscovery {
    /// Collect window for ProbeMatch responses
    window: Duration,
    client: reqwest::Client,
}

impl OnvifDiscovery {
    pub fn new(window: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { window, client })
    }

    /// Parse one ProbeMatch datagram into a descriptor, without the media
    /// profile (filled in by `fetch_active_source`).
    fn parse_probe_match(&self, xml: &str) -> Option<DeviceDescriptor> {
        let xaddrs = extract_xml_value(xml, "XAddrs")?;
        let endpoints: Vec<Endpoint> = xaddrs
            .split_whitespace()
            .filter_map(parse_xaddr)
            .collect();

        let hostname = extract_xml_value(xml, "Scopes")
            .and_then(|s| hostname_from_scopes(&s))
            .or_else(|| endpoints.first().map(|e| e.host.clone()))
            .unwrap_or_default();

        Some(DeviceDescriptor {
            hostname,
            endpoints,
            active_source: ActiveSource::default(),
        })
    }

    /// Fetch the device's first media profile. Failures degrade to an
    /// empty profile; the device is still usable for the registry.
    async fn fetch_active_source(&self, device: &mut DeviceDescriptor) {
        let Some(endpoint) = device.endpoints.first() else {
            return;
        };
        let url = format!("http://{}/onvif/media_service", endpoint.address());

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/soap+xml")
            .body(GET_PROFILES_BODY)
            .send()
            .await;

        let body = match resp {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => body,
                Err(_) => return,
            },
            _ => {
                tracing::debug!(
                    device = %device.hostname,
                    url = %url,
                    "GetProfiles failed, registering with empty media profile"
                );
                return;
            }
        };

        device.active_source = ActiveSource {
            source_token: extract_xml_value(&body, "SourceToken").unwrap_or_default(),
            profile_token: extract_xml_attribute(&body, "Profiles", "token")
                .unwrap_or_default(),
            encoding: extract_xml_value(&body, "Encoding").unwrap_or_default(),
            resolution: Resolution {
                width: extract_xml_value(&body, "Width").and_then(|v| v.parse().ok()),
                height: extract_xml_value(&body, "Height").and_then(|v| v.parse().ok()),
            },
            fps: extract_xml_value(&body, "FrameRateLimit").and_then(|v| v.parse().ok()),
            bitrate: extract_xml_value(&body, "BitrateLimit").and_then(|v| v.parse().ok()),
        };
    }
}

#[async_trait]
impl Discovery for OnvifDiscovery {
    async fn probe(&self) -> Result<Vec<DeviceDescriptor>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Discovery(format!("bind failed: {e}")))?;

        let message = probe_message(&uuid::Uuid::new_v4());
        socket
            .send_to(message.as_bytes(), WS_DISCOVERY_ADDR)
            .await
            .map_err(|e| Error::Discovery(format!("multicast send failed: {e}")))?;

        let mut devices: Vec<DeviceDescriptor> = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        let deadline = tokio::time::Instant::now() + self.window;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, peer))) => {
                    let xml = String::from_utf8_lossy(&buf[..len]);
                    if let Some(device) = self.parse_probe_match(&xml) {
                        // One ProbeMatch per device; ignore duplicates from
                        // devices answering on several interfaces
                        let addr = device.probe_address();
                        if addr.is_some()
                            && !devices.iter().any(|d| d.probe_address() == addr)
                        {
                            tracing::debug!(peer = %peer, hostname = %device.hostname, "ProbeMatch received");
                            devices.push(device);
                        }
                    }
                }
                Ok(Err(e)) => {
                    return Err(Error::Discovery(format!("recv failed: {e}")));
                }
                // Window elapsed
                Err(_) => break,
            }
        }

        for device in &mut devices {
            self.fetch_active_source(device).await;
        }

        tracing::info!(count = devices.len(), "Discovery round complete");
        Ok(devices)
    }
}

/// SOAP GetStreamUri lookup
pub struct OnvifStreamLookup {
    client: reqwest::Client,
}

impl OnvifStreamLookup {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamLookup for OnvifStreamLookup {
    async fn stream_uri(&self, device: &DeviceDescriptor) -> Result<String> {
        let endpoint = device
            .endpoints
            .first()
            .ok_or_else(|| Error::Lookup("device has no endpoints".to_string()))?;
        let url = format!("http://{}/onvif/media_service", endpoint.address());

        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
<s:Body>
<GetStreamUri xmlns="http://www.onvif.org/ver10/media/wsdl">
<StreamSetup>
<Stream xmlns="http://www.onvif.org/ver10/schema">RTP-Unicast</Stream>
<Transport xmlns="http://www.onvif.org/ver10/schema"><Protocol>RTSP</Protocol></Transport>
</StreamSetup>
<ProfileToken>{}</ProfileToken>
</GetStreamUri>
</s:Body>
</s:Envelope>"#,
            device.active_source.profile_token
        );

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/soap+xml")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Lookup(format!("{}: {e}", device.hostname)))?;

        if !resp.status().is_success() {
            return Err(Error::Lookup(format!(
                "{}: GetStreamUri returned {}",
                device.hostname,
                resp.status()
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| Error::Lookup(format!("{}: {e}", device.hostname)))?;

        extract_xml_value(&text, "Uri")
            .ok_or_else(|| Error::Lookup(format!("{}: no Uri in response", device.hostname)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_xaddr_with_port_and_path() {
        let ep = parse_xaddr("http://192.168.1.10:8080/onvif/device_service").unwrap();
        assert_eq!(ep.host, "192.168.1.10");
        assert_eq!(ep.port, Some(8080));
    }

    #[test]
    fn parse_xaddr_without_port() {
        let ep = parse_xaddr("http://192.168.1.10/onvif/device_service").unwrap();
        assert_eq!(ep.host, "192.168.1.10");
        assert_eq!(ep.port, None);
    }

    #[test]
    fn parse_xaddr_rejects_non_http() {
        assert!(parse_xaddr("ftp://192.168.1.10/x").is_none());
    }

    #[test]
    fn hostname_from_scopes_decodes_name() {
        let scopes = "onvif://www.onvif.org/type/video_encoder \
                      onvif://www.onvif.org/name/Front%20Door \
                      onvif://www.onvif.org/location/";
        assert_eq!(
            hostname_from_scopes(scopes),
            Some("Front Door".to_string())
        );
    }

    #[test]
    fn probe_match_parses_endpoints_and_hostname() {
        let discovery = OnvifDiscovery::new(Duration::from_secs(1)).unwrap();
        let xml = r#"<SOAP-ENV:Envelope><SOAP-ENV:Body><d:ProbeMatches><d:ProbeMatch>
            <d:Scopes>onvif://www.onvif.org/name/Garage onvif://www.onvif.org/type/Network_Video_Transmitter</d:Scopes>
            <d:XAddrs>http://192.168.1.22:2020/onvif/device_service http://10.1.1.22/onvif/device_service</d:XAddrs>
            </d:ProbeMatch></d:ProbeMatches></SOAP-ENV:Body></SOAP-ENV:Envelope>"#;

        let device = discovery.parse_probe_match(xml).unwrap();
        assert_eq!(device.hostname, "Garage");
        assert_eq!(device.endpoints.len(), 2);
        assert_eq!(device.probe_address(), Some("192.168.1.22:2020".to_string()));
    }

    #[test]
    fn extract_uri_from_stream_response() {
        let xml = r#"<s:Envelope><s:Body><trt:GetStreamUriResponse>
            <trt:MediaUri><tt:Uri>rtsp://192.168.1.22:554/stream1</tt:Uri></trt:MediaUri>
            </trt:GetStreamUriResponse></s:Body></s:Envelope>"#;
        assert_eq!(
            extract_xml_value(xml, "Uri"),
            Some("rtsp://192.168.1.22:554/stream1".to_string())
        );
    }

    #[test]
    fn extract_profile_token_attribute() {
        let xml = r#"<trt:Profiles token="Profile_1" fixed="true"><tt:Name>main</tt:Name></trt:Profiles>"#;
        assert_eq!(
            extract_xml_attribute(xml, "Profiles", "token"),
            Some("Profile_1".to_string())
        );
    }
}
