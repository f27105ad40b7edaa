//! ASN whois fallback (Team Cymru bulk protocol).
//!
//! Consulted only when the offline database left the ASN unknown. The
//! protocol is plain text over TCP port 43: send a `begin`/`end`
//! block, read pipe-separated rows back.

use crate::error::{EnrichError, Result};
use crate::source::{cache_payload, EnrichmentSource, SourceFields, SourceResult};
use chrono::Duration;
use cp_store::ResponseStatus;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Instant;

/// Whois-based ASN source.
pub struct WhoisSource {
    host: String,
    port: u16,
    timeout: std::time::Duration,
}

impl WhoisSource {
    pub fn new(host: impl Into<String>, port: u16, timeout: std::time::Duration) -> Self {
        WhoisSource {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn query(&self, key: &str) -> Result<String> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| self.fail(format!("resolve {}: {err}", self.host)))?
            .next()
            .ok_or_else(|| self.fail(format!("no address for {}", self.host)))?;

        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|err| self.fail(format!("connect: {err}")))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|err| self.fail(err.to_string()))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|err| self.fail(err.to_string()))?;

        stream
            .write_all(format!("begin\nverbose\n{key}\nend\n").as_bytes())
            .map_err(|err| self.fail(format!("send: {err}")))?;
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .map_err(|err| self.fail(format!("recv: {err}")))?;
        Ok(response)
    }

    fn fail(&self, detail: String) -> EnrichError {
        EnrichError::Source {
            source_name: super::names::WHOIS,
            detail,
        }
    }
}

/// Parse one verbose-mode response.
///
/// Row shape: `AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name`.
pub fn parse_cymru_response(response: &str) -> SourceFields {
    for line in response.lines() {
        // The banner line starts with "Bulk mode;".
        if line.starts_with("Bulk mode") || line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 7 {
            continue;
        }
        let asn = parts[0].parse::<i64>().ok().filter(|asn| *asn != 0);
        if asn.is_none() && parts[0] != "NA" {
            continue;
        }
        let country = (!parts[3].is_empty() && parts[3] != "NA").then(|| parts[3].to_string());
        let org = (!parts[6].is_empty() && parts[6] != "NA").then(|| parts[6].to_string());
        return SourceFields {
            country_code: country,
            asn_number: asn,
            asn_org: org,
            ..SourceFields::default()
        };
    }
    SourceFields::default()
}

impl EnrichmentSource for WhoisSource {
    fn name(&self) -> &'static str {
        super::names::WHOIS
    }

    fn ttl(&self, _status: ResponseStatus) -> Option<Duration> {
        Some(Duration::days(90))
    }

    fn lookup(&self, key: &str) -> Result<SourceResult> {
        let started = Instant::now();
        let response = self.query(key)?;
        let latency_ms = started.elapsed().as_millis() as i64;

        let fields = parse_cymru_response(&response);
        let status = if fields.asn_number.is_some() {
            ResponseStatus::Success
        } else {
            ResponseStatus::NotFound
        };
        let raw = serde_json::json!({ "response": response });
        Ok(SourceResult {
            status,
            payload: cache_payload(&raw, &fields),
            fields,
            latency_ms: Some(latency_ms),
        })
    }
}
