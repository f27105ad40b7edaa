//! Snapshot builder: seals point-in-time enrichment onto sessions.
//!
//! For each session whose `source_ip` is set and whose snapshot
//! columns are still NULL, copy the IP inventory's current ASN,
//! country, and type into the snapshot columns. The write is
//! `COALESCE`-guarded in the store layer, so concurrent builders and
//! re-runs are harmless and a sealed snapshot never changes again.

use crate::error::Result;
use cp_store::{InventoryRepo, IpRow, SessionRepo, SnapshotPatch, Store};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Sessions examined per batch.
const DEFAULT_BATCH: usize = 1_000;

/// Counters from one backfill run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotReport {
    pub examined: u64,
    pub sealed: u64,
    /// Sessions whose IP has no inventory row yet; they stay unsealed
    /// until enrichment catches up.
    pub awaiting_enrichment: u64,
}

/// The snapshot-column backfill builder.
pub struct SnapshotBuilder {
    batch_size: usize,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        SnapshotBuilder {
            batch_size: DEFAULT_BATCH,
        }
    }
}

impl SnapshotBuilder {
    pub fn new(batch_size: usize) -> Self {
        SnapshotBuilder {
            batch_size: batch_size.max(1),
        }
    }

    /// Seal every eligible session.
    pub fn run(&self, store: &mut Store) -> Result<SnapshotReport> {
        let mut report = SnapshotReport::default();

        loop {
            let pending = SessionRepo::unsealed_with_ip(store.conn(), self.batch_size)?;
            if pending.is_empty() {
                break;
            }
            report.examined += pending.len() as u64;

            // One inventory lookup per distinct IP in the batch.
            let mut ips: Vec<String> = pending.iter().map(|(_, ip)| ip.clone()).collect();
            ips.sort();
            ips.dedup();
            let rows: HashMap<String, IpRow> = InventoryRepo::get_ips(store.conn(), &ips)?
                .into_iter()
                .map(|row| (row.ip_address.clone(), row))
                .collect();

            let mut sealed_this_batch = 0u64;
            store.with_tx(|tx| {
                for (session_id, ip) in &pending {
                    let Some(row) = rows.get(ip) else {
                        continue;
                    };
                    // An inventory row that has never been enriched has
                    // nothing worth sealing yet.
                    let Some(enrichment_ts) = row.enrichment_ts else {
                        continue;
                    };
                    let patch = SnapshotPatch {
                        asn_number: row.asn_number,
                        country_code: row.country_code.clone(),
                        ip_type: row.ip_type.as_str().to_string(),
                        enrichment_ts,
                    };
                    if SessionRepo::seal_snapshot(tx, session_id, &patch)? {
                        sealed_this_batch += 1;
                    }
                }
                Ok(())
            })?;
            report.sealed += sealed_this_batch;

            // Everything still unsealed in this page is waiting on
            // enrichment; if nothing sealed, stop rather than spin on
            // the same page.
            if sealed_this_batch == 0 {
                report.awaiting_enrichment += pending.len() as u64;
                break;
            }
        }

        info!(
            examined = report.examined,
            sealed = report.sealed,
            awaiting = report.awaiting_enrichment,
            "snapshot backfill finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use cp_store::{migrate, IpType, SessionDelta};

    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        migrate::migrate(&mut store, "test").unwrap();
        store
    }

    fn add_session(store: &mut Store, session: &str, ip: Option<&str>) {
        let now = Utc::now();
        store
            .with_tx(|tx| {
                SessionRepo::apply_delta(
                    tx,
                    &SessionDelta {
                        session_id: session.into(),
                        first_event_at: now,
                        last_event_at: now,
                        event_count: 1,
                        command_count: 0,
                        login_attempts: 0,
                        file_downloads: 0,
                        ssh_key_injections: 0,
                        max_risk: 0,
                        source_file: "/logs/a.json".into(),
                        source_ip: ip.map(String::from),
                    },
                )
            })
            .unwrap();
    }

    fn add_enriched_ip(store: &mut Store, ip: &str, asn: i64, country: &str) {
        let now = Utc::now();
        store
            .with_tx(|tx| {
                InventoryRepo::ensure_asn(tx, asn, Some("ORG"), Some(country), now)?;
                InventoryRepo::upsert_ip(
                    tx,
                    &IpRow {
                        ip_address: ip.into(),
                        country_code: Some(country.into()),
                        asn_number: Some(asn),
                        asn_org: Some("ORG".into()),
                        ip_type: IpType::Datacenter,
                        first_seen: now,
                        last_seen: now,
                        enrichment_ts: Some(now),
                        geo_source: Some("offline_geo".into()),
                        geo_ts: Some(now),
                        asn_source: Some("offline_geo".into()),
                        asn_ts: Some(now),
                        type_source: Some("scanner_intel".into()),
                        type_ts: Some(now),
                    },
                )
            })
            .unwrap();
    }

    #[test]
    fn test_seals_sessions_with_inventory() {
        let mut db = store();
        add_session(&mut db, "s1", Some("203.0.113.9"));
        add_enriched_ip(&mut db, "203.0.113.9", 64500, "NL");

        let report = SnapshotBuilder::default().run(&mut db).unwrap();
        assert_eq!(report.sealed, 1);

        let summary = SessionRepo::get(db.conn(), "s1").unwrap().unwrap();
        assert_eq!(summary.snapshot_asn, Some(64500));
        assert_eq!(summary.snapshot_country.as_deref(), Some("NL"));
        assert_eq!(summary.snapshot_ip_type.as_deref(), Some("datacenter"));
        assert!(summary.enrichment_at.is_some());
    }

    #[test]
    fn test_sealed_snapshot_never_rewritten() {
        let mut db = store();
        add_session(&mut db, "s1", Some("203.0.113.9"));
        add_enriched_ip(&mut db, "203.0.113.9", 64500, "NL");
        SnapshotBuilder::default().run(&mut db).unwrap();

        // Inventory changes later (the IP moved networks).
        let later = Utc::now() + Duration::hours(1);
        db.with_tx(|tx| {
            InventoryRepo::ensure_asn(tx, 64999, Some("OTHER"), Some("US"), later)?;
            InventoryRepo::upsert_ip(
                tx,
                &IpRow {
                    ip_address: "203.0.113.9".into(),
                    country_code: Some("US".into()),
                    asn_number: Some(64999),
                    asn_org: Some("OTHER".into()),
                    ip_type: IpType::Tor,
                    first_seen: later,
                    last_seen: later,
                    enrichment_ts: Some(later),
                    geo_source: Some("offline_geo".into()),
                    geo_ts: Some(later),
                    asn_source: Some("offline_geo".into()),
                    asn_ts: Some(later),
                    type_source: Some("scanner_intel".into()),
                    type_ts: Some(later),
                },
            )
        })
        .unwrap();

        let report = SnapshotBuilder::default().run(&mut db).unwrap();
        assert_eq!(report.sealed, 0);

        let summary = SessionRepo::get(db.conn(), "s1").unwrap().unwrap();
        assert_eq!(summary.snapshot_asn, Some(64500));
        assert_eq!(summary.snapshot_country.as_deref(), Some("NL"));
    }

    #[test]
    fn test_sessions_without_inventory_wait() {
        let mut db = store();
        add_session(&mut db, "s1", Some("198.51.100.7"));

        let report = SnapshotBuilder::default().run(&mut db).unwrap();
        assert_eq!(report.sealed, 0);
        assert_eq!(report.awaiting_enrichment, 1);

        let summary = SessionRepo::get(db.conn(), "s1").unwrap().unwrap();
        assert_eq!(summary.snapshot_asn, None);
    }

    #[test]
    fn test_sessions_without_ip_ignored() {
        let mut db = store();
        add_session(&mut db, "s1", None);
        let report = SnapshotBuilder::default().run(&mut db).unwrap();
        assert_eq!(report.examined, 0);
    }

    #[test]
    fn test_small_batches_converge() {
        let mut db = store();
        for i in 0..7 {
            add_session(&mut db, &format!("s{i}"), Some("203.0.113.9"));
        }
        add_enriched_ip(&mut db, "203.0.113.9", 64500, "NL");

        let report = SnapshotBuilder::new(2).run(&mut db).unwrap();
        assert_eq!(report.sealed, 7);
    }
}
