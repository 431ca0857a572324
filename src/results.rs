//! Durable, append-only store of torque measurements.
//!
//! Every recorded measurement is keyed by (sample, hole); the key is unique
//! and a second append for the same key fails with `DuplicateKey` without
//! touching the store. Rows are exported to (and re-imported from) a CSV
//! table matching the controller's native export layout, so a UI restart
//! mid-session can reload the store and continue where it left off.

use crate::error::{AppResult, WizardError};
use crate::session::{HoleId, SampleIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// CSV column layout, fixed to the controller's export convention.
pub const CSV_HEADER: [&str; 5] = ["sample", "hole", "target_torque", "torque_ncm", "timestamp"];

/// One recorded torque result for a (sample, hole) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub sample: SampleIndex,
    pub hole: HoleId,
    /// Target torque active during the drive cycle, N·cm.
    pub target_ncm: f64,
    /// The controller's final torque result, N·cm.
    pub torque_ncm: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ResultsStore {
    rows: Vec<Measurement>,
    keys: HashSet<(SampleIndex, HoleId)>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// All rows in recording order.
    pub fn rows(&self) -> &[Measurement] {
        &self.rows
    }

    /// True if (sample, hole) has already been recorded.
    pub fn contains(&self, sample: SampleIndex, hole: HoleId) -> bool {
        self.keys.contains(&(sample, hole))
    }

    /// Appends a measurement; exactly-once per (sample, hole).
    ///
    /// On `DuplicateKey` the store is left unchanged.
    pub fn append(&mut self, measurement: Measurement) -> AppResult<()> {
        let key = (measurement.sample, measurement.hole);
        if !self.keys.insert(key) {
            return Err(WizardError::DuplicateKey {
                sample: measurement.sample,
                hole: measurement.hole,
            });
        }
        log::info!(
            "Recorded sample {}, hole '{}': {:.2} N·cm",
            measurement.sample,
            measurement.hole,
            measurement.torque_ncm
        );
        self.rows.push(measurement);
        Ok(())
    }

    /// Rows for samples 1..=i, for incremental reporting after each
    /// completed sample.
    pub fn rows_for_samples_up_to(&self, sample: SampleIndex) -> Vec<Measurement> {
        self.rows
            .iter()
            .filter(|m| m.sample <= sample)
            .cloned()
            .collect()
    }

    /// Writes all rows to a CSV file with the fixed header.
    pub fn export_csv(&self, path: &Path) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(CSV_HEADER)?;
        for m in &self.rows {
            writer.write_record(&[
                m.sample.to_string(),
                m.hole.to_string(),
                m.target_ncm.to_string(),
                m.torque_ncm.to_string(),
                m.timestamp.to_rfc3339(),
            ])?;
        }
        writer.flush()?;
        log::info!("Exported {} rows to '{}'", self.rows.len(), path.display());
        Ok(())
    }

    /// Reloads a store from a previously exported CSV file.
    ///
    /// The (sample, hole) uniqueness check is enforced on reload, so a
    /// corrupted or hand-edited file with duplicate keys is rejected.
    pub fn import_csv(path: &Path) -> AppResult<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
        let mut records = reader.records();

        let header = records
            .next()
            .transpose()?
            .ok_or_else(|| WizardError::ResultsParse("missing header row".into()))?;
        if header.iter().collect::<Vec<_>>() != CSV_HEADER {
            return Err(WizardError::ResultsParse(format!(
                "unexpected header: {:?}",
                header.iter().collect::<Vec<_>>()
            )));
        }

        let mut store = Self::new();
        for (i, record) in records.enumerate() {
            let record = record?;
            let row = i + 2; // 1-based, after the header
            let field = |idx: usize| -> AppResult<&str> {
                record
                    .get(idx)
                    .ok_or_else(|| WizardError::ResultsParse(format!("row {row}: missing column {idx}")))
            };
            let sample: u32 = field(0)?
                .parse()
                .map_err(|e| WizardError::ResultsParse(format!("row {row}: sample: {e}")))?;
            let hole = HoleId::parse(field(1)?)
                .map_err(|e| WizardError::ResultsParse(format!("row {row}: {e}")))?;
            let target_ncm: f64 = field(2)?
                .parse()
                .map_err(|e| WizardError::ResultsParse(format!("row {row}: target: {e}")))?;
            let torque_ncm: f64 = field(3)?
                .parse()
                .map_err(|e| WizardError::ResultsParse(format!("row {row}: torque: {e}")))?;
            let timestamp = DateTime::parse_from_rfc3339(field(4)?)
                .map_err(|e| WizardError::ResultsParse(format!("row {row}: timestamp: {e}")))?
                .with_timezone(&Utc);

            store.append(Measurement {
                sample: SampleIndex(sample),
                hole,
                target_ncm,
                torque_ncm,
                timestamp,
            })?;
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn m(sample: u32, hole: usize, torque: f64) -> Measurement {
        Measurement {
            sample: SampleIndex(sample),
            hole: HoleId::from_ordinal(hole),
            target_ncm: 24.0,
            torque_ncm: torque,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_key_leaves_store_unchanged() {
        let mut store = ResultsStore::new();
        store.append(m(1, 0, 23.7)).unwrap();
        let err = store.append(m(1, 0, 25.1)).unwrap_err();
        assert!(matches!(err, WizardError::DuplicateKey { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.rows()[0].torque_ncm, 23.7);
    }

    #[test]
    fn test_same_hole_different_sample_is_distinct() {
        let mut store = ResultsStore::new();
        store.append(m(1, 0, 23.7)).unwrap();
        store.append(m(2, 0, 24.2)).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains(SampleIndex(1), HoleId::from_ordinal(0)));
    }

    #[test]
    fn test_rows_for_samples_up_to() {
        let mut store = ResultsStore::new();
        for sample in 1..=3 {
            for hole in 0..2 {
                store.append(m(sample, hole, 24.0)).unwrap();
            }
        }
        let partial = store.rows_for_samples_up_to(SampleIndex(2));
        assert_eq!(partial.len(), 4);
        assert!(partial.iter().all(|r| r.sample.0 <= 2));
    }

    #[test]
    fn test_csv_round_trip_is_identical() {
        let mut store = ResultsStore::new();
        store.append(m(1, 0, 23.456789)).unwrap();
        store.append(m(1, 1, 25.0)).unwrap();
        store.append(m(2, 0, 22.999)).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        store.export_csv(&path).unwrap();

        let reloaded = ResultsStore::import_csv(&path).unwrap();
        assert_eq!(reloaded.rows(), store.rows());
    }

    #[test]
    fn test_import_rejects_duplicate_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        std::fs::write(
            &path,
            "sample,hole,target_torque,torque_ncm,timestamp\n\
             1,A,24,23.5,2026-08-28T10:00:00+00:00\n\
             1,A,24,24.5,2026-08-28T10:00:05+00:00\n",
        )
        .unwrap();
        assert!(matches!(
            ResultsStore::import_csv(&path),
            Err(WizardError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_import_rejects_wrong_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        std::fs::write(&path, "a,b,c\n").unwrap();
        assert!(matches!(
            ResultsStore::import_csv(&path),
            Err(WizardError::ResultsParse(_))
        ));
    }
}
