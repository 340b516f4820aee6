use anyhow::{Context, Result};
use chrono::Local;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::audit::AuditEntry;
use crate::models::{
    DividendStatement, EquityEvent, ExerciseStatement, InterestStatement, Lot,
    PurchaseStatement, Sale, SaleResult, WageStatement,
};

/// Schema version for data migration
const SCHEMA_VERSION: u32 = 1;

/// Summary persisted after each reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRun {
    pub year: i32,
    pub run_at: String,
    pub sales_processed: usize,
    pub results_produced: usize,
    pub warnings: Vec<String>,
    pub unmatched_sales: Vec<String>,
}

/// Abstract repository of typed records. The engines only ever see this
/// trait; the CLI wires up a [`JsonStore`].
pub trait RecordStore {
    fn save_event(&mut self, event: EquityEvent) -> Result<()>;
    fn save_lot(&mut self, lot: Lot) -> Result<()>;
    fn save_sale(&mut self, sale: Sale) -> Result<()>;
    fn save_sale_result(&mut self, result: SaleResult) -> Result<()>;
    fn save_audit_entry(&mut self, entry: AuditEntry) -> Result<()>;
    fn save_wage(&mut self, wage: WageStatement) -> Result<()>;
    fn save_dividend(&mut self, dividend: DividendStatement) -> Result<()>;
    fn save_interest(&mut self, interest: InterestStatement) -> Result<()>;
    fn save_exercise(&mut self, exercise: ExerciseStatement) -> Result<()>;
    fn save_purchase(&mut self, purchase: PurchaseStatement) -> Result<()>;

    /// All lots, every year; prior-year lots yield current-year sales
    fn get_lots(&self) -> Result<Vec<Lot>>;
    fn get_events(&self) -> Result<Vec<EquityEvent>>;
    /// All purchase statements; an ESPP sale may close a prior-year
    /// purchase
    fn get_purchases(&self) -> Result<Vec<PurchaseStatement>>;
    fn get_exercises(&self) -> Result<Vec<ExerciseStatement>>;
    fn get_sales(&self, year: i32) -> Result<Vec<Sale>>;
    fn get_sale_results(&self, year: i32) -> Result<Vec<SaleResult>>;
    fn get_wages(&self, year: i32) -> Result<Vec<WageStatement>>;
    fn get_dividends(&self, year: i32) -> Result<Vec<DividendStatement>>;
    fn get_interest(&self, year: i32) -> Result<Vec<InterestStatement>>;

    /// Remove prior results for `year`; returns how many were dropped
    fn clear_sale_results(&mut self, year: i32) -> Result<usize>;
    fn reset_lot_shares(&mut self, lot_id: &str, to_value: Decimal) -> Result<()>;
    fn record_reconciliation_run(&mut self, run: ReconciliationRun) -> Result<()>;
    fn get_reconciliation_runs(&self, year: i32) -> Result<Vec<ReconciliationRun>>;
}

/// Every persisted collection in one versioned document
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    lots: Vec<Lot>,
    #[serde(default)]
    events: Vec<EquityEvent>,
    #[serde(default)]
    sales: Vec<Sale>,
    #[serde(default)]
    sale_results: Vec<SaleResult>,
    #[serde(default)]
    wages: Vec<WageStatement>,
    #[serde(default)]
    dividends: Vec<DividendStatement>,
    #[serde(default)]
    interest: Vec<InterestStatement>,
    #[serde(default)]
    exercises: Vec<ExerciseStatement>,
    #[serde(default)]
    purchases: Vec<PurchaseStatement>,
    #[serde(default)]
    runs: Vec<ReconciliationRun>,
}

/// Data structure for versioned persistence
#[derive(Debug, Serialize, Deserialize)]
struct PersistedData {
    schema_version: u32,
    #[serde(flatten)]
    data: StoreData,
    metadata: DataMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataMetadata {
    last_saved: String,
    save_count: u32,
    app_version: String,
}

/// File-backed [`RecordStore`]: one schema-versioned JSON document with
/// atomic writes and rotating backups, plus an append-only audit log.
pub struct JsonStore {
    data_dir: PathBuf,
    backup_dir: PathBuf,
    data: StoreData,
    save_count: u32,
}

impl JsonStore {
    /// Open (or create) the store in the default data directory
    pub fn open_default() -> Result<Self> {
        Self::open(crate::config::Config::load()?.data_dir()?)
    }

    /// Open (or create) the store in a specific directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data_dir = path.as_ref().to_path_buf();
        let backup_dir = data_dir.join("backups");
        let mut store = JsonStore {
            data_dir,
            backup_dir,
            data: StoreData::default(),
            save_count: 0,
        };
        store.ensure_directories()?;
        store.load()?;
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        fs::create_dir_all(&self.backup_dir)
            .with_context(|| format!("Failed to create backup directory: {:?}", self.backup_dir))?;
        Ok(())
    }

    fn records_file(&self) -> PathBuf {
        self.data_dir.join("records.json")
    }

    fn audit_file(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    /// Create a backup of the records file before overwriting
    fn backup_file(&self, file_path: &Path) -> Result<()> {
        if !file_path.exists() {
            return Ok(());
        }

        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid file name"))?;

        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S%.3f");
        let backup_name = format!("{}_{}.bak", file_name.trim_end_matches(".json"), timestamp);
        fs::copy(file_path, self.backup_dir.join(backup_name))
            .with_context(|| format!("Failed to backup file: {:?}", file_path))?;

        self.cleanup_old_backups(file_name)?;
        Ok(())
    }

    /// Keep only the most recent backups
    fn cleanup_old_backups(&self, base_filename: &str) -> Result<()> {
        const MAX_BACKUPS: usize = 10;
        let prefix = base_filename.trim_end_matches(".json");
        let mut backups: Vec<PathBuf> = Vec::new();

        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
                if filename.starts_with(prefix) && filename.ends_with(".bak") {
                    backups.push(path);
                }
            }
        }

        backups.sort_by_key(|p| {
            fs::metadata(p)
                .and_then(|m| m.modified())
                .ok()
                .map(std::cmp::Reverse)
        });

        if backups.len() > MAX_BACKUPS {
            for backup in &backups[MAX_BACKUPS..] {
                fs::remove_file(backup)
                    .with_context(|| format!("Failed to remove old backup: {:?}", backup))?;
            }
        }
        Ok(())
    }

    fn atomic_write(&self, path: &Path, content: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("File has no parent directory"))?;

        let mut temp_file =
            NamedTempFile::new_in(parent).with_context(|| "Failed to create temporary file")?;
        temp_file
            .write_all(content)
            .with_context(|| "Failed to write to temporary file")?;
        temp_file
            .flush()
            .with_context(|| "Failed to flush temporary file")?;
        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist file to: {:?}", path))?;
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let file_path = self.records_file();
        if !file_path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read file: {:?}", file_path))?;

        match serde_json::from_str::<PersistedData>(&content) {
            Ok(persisted) => {
                if persisted.schema_version != SCHEMA_VERSION {
                    eprintln!(
                        "Migrating records from schema version {} to {}",
                        persisted.schema_version, SCHEMA_VERSION
                    );
                }
                self.save_count = persisted.metadata.save_count;
                self.data = persisted.data;
            }
            Err(e) => {
                eprintln!("Warning: Failed to parse records file: {}", e);
                eprintln!("Backing up the unreadable file and starting fresh...");
                self.backup_file(&file_path)?;
                self.data = StoreData::default();
            }
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        self.ensure_directories()?;
        let file_path = self.records_file();
        self.backup_file(&file_path)?;

        self.save_count += 1;
        let persisted = PersistedData {
            schema_version: SCHEMA_VERSION,
            data: self.data.clone(),
            metadata: DataMetadata {
                last_saved: Local::now().to_rfc3339(),
                save_count: self.save_count,
                app_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let json = serde_json::to_string_pretty(&persisted)
            .with_context(|| "Failed to serialize record data")?;
        self.atomic_write(&file_path, json.as_bytes())
    }
}

impl RecordStore for JsonStore {
    fn save_event(&mut self, event: EquityEvent) -> Result<()> {
        match self.data.events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event,
            None => self.data.events.push(event),
        }
        self.persist()
    }

    fn save_lot(&mut self, lot: Lot) -> Result<()> {
        match self.data.lots.iter_mut().find(|l| l.id == lot.id) {
            Some(existing) => *existing = lot,
            None => self.data.lots.push(lot),
        }
        self.persist()
    }

    fn save_sale(&mut self, sale: Sale) -> Result<()> {
        match self.data.sales.iter_mut().find(|s| s.id == sale.id) {
            Some(existing) => *existing = sale,
            None => self.data.sales.push(sale),
        }
        self.persist()
    }

    fn save_sale_result(&mut self, result: SaleResult) -> Result<()> {
        self.data.sale_results.push(result);
        self.persist()
    }

    fn save_audit_entry(&mut self, entry: AuditEntry) -> Result<()> {
        self.ensure_directories()?;
        let line = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_file())
            .with_context(|| "Failed to open audit log")?;
        writeln!(file, "{}", line).with_context(|| "Failed to append audit entry")?;
        Ok(())
    }

    fn save_wage(&mut self, wage: WageStatement) -> Result<()> {
        self.data.wages.push(wage);
        self.persist()
    }

    fn save_dividend(&mut self, dividend: DividendStatement) -> Result<()> {
        self.data.dividends.push(dividend);
        self.persist()
    }

    fn save_interest(&mut self, interest: InterestStatement) -> Result<()> {
        self.data.interest.push(interest);
        self.persist()
    }

    fn save_exercise(&mut self, exercise: ExerciseStatement) -> Result<()> {
        self.data.exercises.push(exercise);
        self.persist()
    }

    fn save_purchase(&mut self, purchase: PurchaseStatement) -> Result<()> {
        self.data.purchases.push(purchase);
        self.persist()
    }

    fn get_lots(&self) -> Result<Vec<Lot>> {
        Ok(self.data.lots.clone())
    }

    fn get_events(&self) -> Result<Vec<EquityEvent>> {
        Ok(self.data.events.clone())
    }

    fn get_purchases(&self) -> Result<Vec<PurchaseStatement>> {
        Ok(self.data.purchases.clone())
    }

    fn get_exercises(&self) -> Result<Vec<ExerciseStatement>> {
        Ok(self.data.exercises.clone())
    }

    fn get_sales(&self, year: i32) -> Result<Vec<Sale>> {
        use chrono::Datelike;
        Ok(self
            .data
            .sales
            .iter()
            .filter(|s| s.sale_date.year() == year)
            .cloned()
            .collect())
    }

    fn get_sale_results(&self, year: i32) -> Result<Vec<SaleResult>> {
        use chrono::Datelike;
        Ok(self
            .data
            .sale_results
            .iter()
            .filter(|r| r.sale_date.year() == year)
            .cloned()
            .collect())
    }

    fn get_wages(&self, year: i32) -> Result<Vec<WageStatement>> {
        Ok(self
            .data
            .wages
            .iter()
            .filter(|w| w.year == year)
            .cloned()
            .collect())
    }

    fn get_dividends(&self, year: i32) -> Result<Vec<DividendStatement>> {
        Ok(self
            .data
            .dividends
            .iter()
            .filter(|d| d.year == year)
            .cloned()
            .collect())
    }

    fn get_interest(&self, year: i32) -> Result<Vec<InterestStatement>> {
        Ok(self
            .data
            .interest
            .iter()
            .filter(|i| i.year == year)
            .cloned()
            .collect())
    }

    fn clear_sale_results(&mut self, year: i32) -> Result<usize> {
        use chrono::Datelike;
        let before = self.data.sale_results.len();
        self.data
            .sale_results
            .retain(|r| r.sale_date.year() != year);
        let removed = before - self.data.sale_results.len();
        self.persist()?;
        Ok(removed)
    }

    fn reset_lot_shares(&mut self, lot_id: &str, to_value: Decimal) -> Result<()> {
        let lot = self
            .data
            .lots
            .iter_mut()
            .find(|l| l.id == lot_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown lot id: {}", lot_id))?;
        lot.shares_remaining = to_value;
        self.persist()
    }

    fn record_reconciliation_run(&mut self, run: ReconciliationRun) -> Result<()> {
        self.data.runs.push(run);
        self.persist()
    }

    fn get_reconciliation_runs(&self, year: i32) -> Result<Vec<ReconciliationRun>> {
        Ok(self
            .data
            .runs
            .iter()
            .filter(|r| r.year == year)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EquityClass, LotBasis, Security};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn sample_lot(id: &str) -> Lot {
        Lot::new(
            id.to_string(),
            EquityClass::Rsu,
            Security::new("ACME", "Acme Corp"),
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            dec!(100),
            LotBasis::Regular {
                cost_per_share: dec!(150),
            },
            "evt-1".to_string(),
            "test".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonStore::open(temp_dir.path().join("data")).unwrap();
        assert!(store.data_dir().exists());
        assert!(temp_dir.path().join("data").join("backups").exists());
    }

    #[test]
    fn test_save_and_reload_lot() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut store = JsonStore::open(temp_dir.path()).unwrap();
            store.save_lot(sample_lot("lot-1")).unwrap();
        }
        let store = JsonStore::open(temp_dir.path()).unwrap();
        let lots = store.get_lots().unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].id, "lot-1");
        assert_eq!(lots[0].cost_per_share(), dec!(150));
    }

    #[test]
    fn test_save_lot_upserts_by_id() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = JsonStore::open(temp_dir.path()).unwrap();

        store.save_lot(sample_lot("lot-1")).unwrap();
        let mut updated = sample_lot("lot-1");
        updated.shares_remaining = dec!(40);
        store.save_lot(updated).unwrap();

        let lots = store.get_lots().unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].shares_remaining, dec!(40));
    }

    #[test]
    fn test_reset_lot_shares() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = JsonStore::open(temp_dir.path()).unwrap();

        let mut lot = sample_lot("lot-1");
        lot.shares_remaining = dec!(10);
        store.save_lot(lot).unwrap();
        store.reset_lot_shares("lot-1", dec!(100)).unwrap();

        assert_eq!(store.get_lots().unwrap()[0].shares_remaining, dec!(100));
        assert!(store.reset_lot_shares("missing", dec!(5)).is_err());
    }

    #[test]
    fn test_year_filtered_queries() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = JsonStore::open(temp_dir.path()).unwrap();

        for (id, year) in [("s1", 2024), ("s2", 2025)] {
            store
                .save_sale(Sale {
                    id: id.to_string(),
                    lot_id: None,
                    security: Security::new("ACME", "Acme Corp"),
                    sale_date: NaiveDate::from_ymd_opt(year, 6, 1).unwrap(),
                    shares: dec!(10),
                    proceeds_per_share: dec!(100),
                    broker_reported_basis: None,
                    wash_sale_disallowed: Decimal::ZERO,
                    received_1099: true,
                    basis_reported_to_irs: true,
                    origin: "test".to_string(),
                })
                .unwrap();
        }

        assert_eq!(store.get_sales(2024).unwrap().len(), 1);
        assert_eq!(store.get_sales(2025).unwrap().len(), 1);
        assert_eq!(store.get_sales(2023).unwrap().len(), 0);
    }

    #[test]
    fn test_backup_created_on_second_save() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = JsonStore::open(temp_dir.path()).unwrap();
        store.save_lot(sample_lot("lot-1")).unwrap();
        store.save_lot(sample_lot("lot-2")).unwrap();

        let backups: Vec<_> = fs::read_dir(temp_dir.path().join("backups"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(!backups.is_empty());
    }

    #[test]
    fn test_corrupted_records_handled_gracefully() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("backups")).unwrap();
        fs::write(
            temp_dir.path().join("records.json"),
            "{ this is not valid json }",
        )
        .unwrap();

        let store = JsonStore::open(temp_dir.path()).unwrap();
        assert!(store.get_lots().unwrap().is_empty());
    }

    #[test]
    fn test_audit_log_appends() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = JsonStore::open(temp_dir.path()).unwrap();
        store
            .save_audit_entry(AuditEntry::new("reconcile", "start").input("year", 2025))
            .unwrap();
        store
            .save_audit_entry(AuditEntry::new("reconcile", "finish").output("results", 3))
            .unwrap();

        let content = fs::read_to_string(temp_dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_clear_sale_results_counts() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = JsonStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.clear_sale_results(2025).unwrap(), 0);
    }
}
