//! Offline geo/ASN range database.
//!
//! Loads an `ip2asn`-style TSV dump (`start<TAB>end<TAB>asn<TAB>
//! country<TAB>org`, dotted or colon-form addresses) into sorted range
//! tables and answers lookups with a binary search. Zero marginal
//! cost, so the cascade always consults it first; freshness is
//! governed by the file's mtime, refreshed out of band (weekly in
//! production), and the TTL is infinite.

use crate::error::{EnrichError, Result};
use crate::source::{cache_payload, EnrichmentSource, SourceFields, SourceResult};
use chrono::Duration;
use cp_store::ResponseStatus;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

struct Range {
    start: u128,
    end: u128,
    asn: i64,
    country: Option<String>,
    org: Option<String>,
}

/// The offline range database.
pub struct OfflineGeoSource {
    path: PathBuf,
    v4: Vec<Range>,
    v6: Vec<Range>,
    mtime: Option<SystemTime>,
}

impl OfflineGeoSource {
    /// Load the TSV dump from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| EnrichError::OfflineDbUnavailable(format!("{}: {err}", path.display())))?;
        let mtime = std::fs::metadata(path).ok().and_then(|m| m.modified().ok());

        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        let mut skipped = 0usize;
        for line in raw.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some((range, is_v4)) => {
                    if is_v4 {
                        v4.push(range);
                    } else {
                        v6.push(range);
                    }
                }
                None => skipped += 1,
            }
        }
        v4.sort_by_key(|r| r.start);
        v6.sort_by_key(|r| r.start);
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "offline db lines skipped");
        }
        info!(
            path = %path.display(),
            v4_ranges = v4.len(),
            v6_ranges = v6.len(),
            "offline geo/ASN database loaded"
        );
        Ok(OfflineGeoSource {
            path: path.to_path_buf(),
            v4,
            v6,
            mtime,
        })
    }

    /// Age of the database file, from its mtime.
    pub fn age(&self) -> Option<std::time::Duration> {
        self.mtime.and_then(|mtime| mtime.elapsed().ok())
    }

    /// Path the database was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn find(&self, ip: IpAddr) -> Option<&Range> {
        let (table, needle) = match ip {
            IpAddr::V4(v4) => (&self.v4, u128::from(u32::from(v4))),
            IpAddr::V6(v6) => (&self.v6, u128::from(v6)),
        };
        let idx = table.partition_point(|r| r.start <= needle);
        if idx == 0 {
            return None;
        }
        let candidate = &table[idx - 1];
        (candidate.end >= needle).then_some(candidate)
    }
}

fn parse_line(line: &str) -> Option<(Range, bool)> {
    let mut parts = line.split('\t');
    let start: IpAddr = parts.next()?.trim().parse().ok()?;
    let end: IpAddr = parts.next()?.trim().parse().ok()?;
    let asn: i64 = parts.next()?.trim().parse().ok()?;
    let country = parts.next().map(str::trim).filter(|c| {
        !c.is_empty() && *c != "None" && *c != "ZZ"
    });
    let org = parts.next().map(str::trim).filter(|o| !o.is_empty() && *o != "Not routed");

    let (start, end, is_v4) = match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            (u128::from(u32::from(s)), u128::from(u32::from(e)), true)
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => (u128::from(s), u128::from(e), false),
        _ => return None,
    };
    if end < start {
        return None;
    }
    Some((
        Range {
            start,
            end,
            asn,
            country: country.map(String::from),
            org: org.map(String::from),
        },
        is_v4,
    ))
}

impl EnrichmentSource for OfflineGeoSource {
    fn name(&self) -> &'static str {
        super::names::OFFLINE_GEO
    }

    fn ttl(&self, _status: ResponseStatus) -> Option<Duration> {
        // Infinite: the DB file's mtime governs refresh instead.
        None
    }

    fn lookup(&self, key: &str) -> Result<SourceResult> {
        let ip: IpAddr = key.trim().parse().map_err(|_| EnrichError::Source {
            source_name: self.name(),
            detail: format!("not an IP address: {key}"),
        })?;

        let Some(range) = self.find(ip) else {
            return Ok(SourceResult::not_found());
        };
        // ASN 0 marks unrouted space in the dump format.
        let fields = SourceFields {
            country_code: range.country.clone(),
            asn_number: (range.asn != 0).then_some(range.asn),
            asn_org: range.org.clone(),
            ..SourceFields::default()
        };
        let raw = serde_json::json!({
            "asn": range.asn,
            "country": range.country,
            "org": range.org,
        });
        Ok(SourceResult {
            status: ResponseStatus::Success,
            payload: cache_payload(&raw, &fields),
            fields,
            latency_ms: Some(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_db(dir: &tempfile::TempDir, lines: &str) -> PathBuf {
        let path = dir.path().join("ip2asn.tsv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(lines.as_bytes())
            .unwrap();
        path
    }

    fn sample_db(dir: &tempfile::TempDir) -> OfflineGeoSource {
        let path = write_db(
            dir,
            "8.8.8.0\t8.8.8.255\t15169\tUS\tGOOGLE\n\
             203.0.113.0\t203.0.113.255\t64500\tNL\tEXAMPLE-NET\n\
             198.51.100.0\t198.51.100.255\t0\tNone\tNot routed\n\
             2001:db8::\t2001:db8:ffff:ffff:ffff:ffff:ffff:ffff\t64501\tDE\tSIX-EXAMPLE\n",
        );
        OfflineGeoSource::load(&path).unwrap()
    }

    #[test]
    fn test_v4_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(&dir);
        let result = db.lookup("8.8.8.8").unwrap();
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.fields.country_code.as_deref(), Some("US"));
        assert_eq!(result.fields.asn_number, Some(15169));
        assert_eq!(result.fields.asn_org.as_deref(), Some("GOOGLE"));
    }

    #[test]
    fn test_v6_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(&dir);
        let result = db.lookup("2001:db8::1").unwrap();
        assert_eq!(result.fields.asn_number, Some(64501));
        assert_eq!(result.fields.country_code.as_deref(), Some("DE"));
    }

    #[test]
    fn test_gap_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(&dir);
        let result = db.lookup("9.9.9.9").unwrap();
        assert_eq!(result.status, ResponseStatus::NotFound);
    }

    #[test]
    fn test_unrouted_range_has_no_asn() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(&dir);
        let result = db.lookup("198.51.100.77").unwrap();
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.fields.asn_number, None);
        assert_eq!(result.fields.country_code, None);
    }

    #[test]
    fn test_garbage_key_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(&dir);
        assert!(db.lookup("not-an-ip").is_err());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_db(
            &dir,
            "garbage line\n8.8.8.0\t8.8.8.255\t15169\tUS\tGOOGLE\n",
        );
        let db = OfflineGeoSource::load(&path).unwrap();
        assert!(db.lookup("8.8.8.8").unwrap().fields.asn_number.is_some());
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.tsv");
        assert!(matches!(
            OfflineGeoSource::load(&missing),
            Err(EnrichError::OfflineDbUnavailable(_))
        ));
    }

    #[test]
    fn test_infinite_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(&dir);
        assert_eq!(db.ttl(ResponseStatus::Success), None);
    }
}
