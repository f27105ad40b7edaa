//! IP and ASN inventories.
//!
//! One row per IP, one row per ASN. Writes for the same key are
//! serialized by running inside IMMEDIATE transactions, which is
//! SQLite's equivalent of row-level locking for this access pattern:
//! the ASN row is ensured and the IP row upserted under one write lock,
//! so duplicate-insert races cannot happen.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

/// Classification of an IP's origin network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IpType {
    // Variant order is the merge ranking, weakest first: when two
    // sources tie on confidence the stronger classification wins.
    #[default]
    Unknown,
    Residential,
    Proxy,
    Vpn,
    Datacenter,
    Cloud,
    Tor,
}

impl IpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpType::Unknown => "unknown",
            IpType::Residential => "residential",
            IpType::Proxy => "proxy",
            IpType::Vpn => "vpn",
            IpType::Datacenter => "datacenter",
            IpType::Cloud => "cloud",
            IpType::Tor => "tor",
        }
    }

    pub fn parse(s: &str) -> IpType {
        match s {
            "residential" => IpType::Residential,
            "proxy" => IpType::Proxy,
            "vpn" => IpType::Vpn,
            "datacenter" => IpType::Datacenter,
            "cloud" => IpType::Cloud,
            "tor" => IpType::Tor,
            _ => IpType::Unknown,
        }
    }
}

/// Current best-known enrichment for one IP.
#[derive(Debug, Clone)]
pub struct IpRow {
    pub ip_address: String,
    pub country_code: Option<String>,
    pub asn_number: Option<i64>,
    pub asn_org: Option<String>,
    pub ip_type: IpType,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub enrichment_ts: Option<DateTime<Utc>>,
    /// Per-field provenance: which source set the field, and when.
    pub geo_source: Option<String>,
    pub geo_ts: Option<DateTime<Utc>>,
    pub asn_source: Option<String>,
    pub asn_ts: Option<DateTime<Utc>>,
    pub type_source: Option<String>,
    pub type_ts: Option<DateTime<Utc>>,
}

/// Org-level facts for one ASN.
#[derive(Debug, Clone)]
pub struct AsnRow {
    pub asn_number: i64,
    pub asn_org: Option<String>,
    pub country_hint: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Repository over both inventories.
pub struct InventoryRepo;

impl InventoryRepo {
    /// Look up an IP row.
    pub fn get_ip(conn: &Connection, ip: &str) -> Result<Option<IpRow>> {
        let row = conn
            .query_row(
                "SELECT ip_address, country_code, asn_number, asn_org, ip_type,
                        first_seen, last_seen, enrichment_ts,
                        geo_source, geo_ts, asn_source, asn_ts, type_source, type_ts
                 FROM ip_inventory WHERE ip_address = ?1",
                params![ip],
                |row| {
                    let ip_type: String = row.get(4)?;
                    Ok(IpRow {
                        ip_address: row.get(0)?,
                        country_code: row.get(1)?,
                        asn_number: row.get(2)?,
                        asn_org: row.get(3)?,
                        ip_type: IpType::parse(&ip_type),
                        first_seen: row.get(5)?,
                        last_seen: row.get(6)?,
                        enrichment_ts: row.get(7)?,
                        geo_source: row.get(8)?,
                        geo_ts: row.get(9)?,
                        asn_source: row.get(10)?,
                        asn_ts: row.get(11)?,
                        type_source: row.get(12)?,
                        type_ts: row.get(13)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Batch lookup for the snapshot builder.
    pub fn get_ips(conn: &Connection, ips: &[String]) -> Result<Vec<IpRow>> {
        let mut rows = Vec::with_capacity(ips.len());
        for ip in ips {
            if let Some(row) = Self::get_ip(conn, ip)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Ensure the ASN row exists and bump its last_seen. Idempotent.
    pub fn ensure_asn(
        tx: &Transaction<'_>,
        asn_number: i64,
        asn_org: Option<&str>,
        country_hint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO asn_inventory (asn_number, asn_org, country_hint, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (asn_number) DO UPDATE SET
                 asn_org      = COALESCE(asn_inventory.asn_org, excluded.asn_org),
                 country_hint = COALESCE(asn_inventory.country_hint, excluded.country_hint),
                 last_seen    = MAX(asn_inventory.last_seen, excluded.last_seen)",
            params![asn_number, asn_org, country_hint, now],
        )?;
        Ok(())
    }

    /// Insert-or-update the IP row with the cascade's merged aggregate.
    ///
    /// `first_seen` keeps its original value; `last_seen` is monotonic.
    /// The caller ensures the referenced ASN row exists in the same
    /// transaction.
    pub fn upsert_ip(tx: &Transaction<'_>, row: &IpRow) -> Result<()> {
        tx.execute(
            "INSERT INTO ip_inventory
             (ip_address, country_code, asn_number, asn_org, ip_type,
              first_seen, last_seen, enrichment_ts,
              geo_source, geo_ts, asn_source, asn_ts, type_source, type_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT (ip_address) DO UPDATE SET
                 country_code  = excluded.country_code,
                 asn_number    = excluded.asn_number,
                 asn_org       = excluded.asn_org,
                 ip_type       = excluded.ip_type,
                 first_seen    = MIN(ip_inventory.first_seen, excluded.first_seen),
                 last_seen     = MAX(ip_inventory.last_seen, excluded.last_seen),
                 enrichment_ts = excluded.enrichment_ts,
                 geo_source    = excluded.geo_source,
                 geo_ts        = excluded.geo_ts,
                 asn_source    = excluded.asn_source,
                 asn_ts        = excluded.asn_ts,
                 type_source   = excluded.type_source,
                 type_ts       = excluded.type_ts",
            params![
                row.ip_address,
                row.country_code,
                row.asn_number,
                row.asn_org,
                row.ip_type.as_str(),
                row.first_seen,
                row.last_seen,
                row.enrichment_ts,
                row.geo_source,
                row.geo_ts,
                row.asn_source,
                row.asn_ts,
                row.type_source,
                row.type_ts,
            ],
        )?;
        Ok(())
    }

    /// Record a sighting without enrichment: creates the row with
    /// defaults or bumps last_seen.
    pub fn touch_ip(tx: &Transaction<'_>, ip: &str, seen_at: DateTime<Utc>) -> Result<()> {
        tx.execute(
            "INSERT INTO ip_inventory (ip_address, ip_type, first_seen, last_seen)
             VALUES (?1, 'unknown', ?2, ?2)
             ON CONFLICT (ip_address) DO UPDATE SET
                 first_seen = MIN(ip_inventory.first_seen, excluded.first_seen),
                 last_seen  = MAX(ip_inventory.last_seen, excluded.last_seen)",
            params![ip, seen_at],
        )?;
        Ok(())
    }

    /// IPs whose enrichment is missing or older than `stale_before`.
    pub fn stale_ips(
        conn: &Connection,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT ip_address FROM ip_inventory
             WHERE enrichment_ts IS NULL OR enrichment_ts < ?1
             ORDER BY last_seen DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![stale_before, limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every IP currently in the inventory, oldest-enriched first.
    pub fn all_ips(conn: &Connection, limit: usize) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT ip_address FROM ip_inventory
             ORDER BY enrichment_ts IS NOT NULL, enrichment_ts
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Look up an ASN row.
    pub fn get_asn(conn: &Connection, asn_number: i64) -> Result<Option<AsnRow>> {
        let row = conn
            .query_row(
                "SELECT asn_number, asn_org, country_hint, first_seen, last_seen
                 FROM asn_inventory WHERE asn_number = ?1",
                params![asn_number],
                |row| {
                    Ok(AsnRow {
                        asn_number: row.get(0)?,
                        asn_org: row.get(1)?,
                        country_hint: row.get(2)?,
                        first_seen: row.get(3)?,
                        last_seen: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
