//! Store — the two record files behind the habit tracker.
//!
//! - `chains.bin`: habit definitions ([`ChainCatalog`])
//! - `links.bin`: completion marks in local-day order ([`LinkLedger`])
//!
//! Each file is locked exclusively from materialize until its catalog or
//! ledger is dropped, so a second process against the same data directory
//! waits instead of interleaving writes. The two files are persisted
//! independently; there is no atomicity across them.

pub mod catalog;
pub mod codec;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod record_file;
pub mod verify;

use std::path::{Path, PathBuf};

use crate::calendar::{Calendar, SystemCalendar};
use crate::stats::{self, ChainStats};
use catalog::ChainCatalog;
use codec::{Chain, Link};
use error::StoreResult;
use ledger::LinkLedger;

pub const CHAIN_FILE: &str = "chains.bin";
pub const LINK_FILE: &str = "links.bin";

/// A data directory plus the calendar used to interpret it.
#[derive(Debug, Clone)]
pub struct Store<C = SystemCalendar> {
    data_dir: PathBuf,
    calendar: C,
}

impl<C: Calendar + Clone> Store<C> {
    /// Open the store at `data_dir`, creating the directory if needed.
    /// Files are created lazily on first materialize.
    pub fn open(data_dir: &Path, calendar: C) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            calendar,
        })
    }

    /// Lock and load the chain file.
    pub fn materialize_chains(&self) -> StoreResult<ChainCatalog> {
        ChainCatalog::materialize(&self.data_dir.join(CHAIN_FILE))
    }

    /// Lock and load the link file with room for `extra_capacity` inserts
    /// (one per chain a command may link).
    pub fn materialize_links(&self, extra_capacity: usize) -> StoreResult<LinkLedger<C>> {
        LinkLedger::materialize(
            &self.data_dir.join(LINK_FILE),
            extra_capacity,
            self.calendar.clone(),
        )
    }

    /// Stats for `chain` from its links in ascending time order.
    pub fn stats(&self, chain: &Chain, links: &[Link]) -> ChainStats {
        stats::compute_stats(chain, links, &self.calendar)
    }

    pub fn calendar(&self) -> &C {
        &self.calendar
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedCalendar;
    use catalog::NewChain;
    use codec::{ChainKind, Color};
    use ledger::LinkOutcome;
    use lock::FileLock;
    use tempfile::TempDir;

    const DAY: i64 = 86_400;
    const JAN_1: i64 = 1_704_067_200;

    fn store(dir: &TempDir) -> Store<FixedCalendar> {
        Store::open(&dir.path().join("data"), FixedCalendar::utc(JAN_1 + 10 * DAY)).unwrap()
    }

    #[test]
    fn open_creates_data_dir() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.data_dir().is_dir());
        assert!(!store.data_dir().join(CHAIN_FILE).exists());
    }

    #[test]
    fn chain_and_link_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let id = {
            let mut chains = store.materialize_chains().unwrap();
            let id = chains
                .add(NewChain {
                    name: "stretch".into(),
                    kind: ChainKind::Daily,
                    color: Color::DEFAULT,
                    created: JAN_1,
                })
                .unwrap();
            chains.persist().unwrap();
            id
        };

        {
            let mut links = store.materialize_links(3).unwrap();
            for d in 0..3 {
                assert_eq!(links.add(id, JAN_1 + d * DAY, 0).unwrap(), LinkOutcome::Added);
            }
            links.persist().unwrap();
        }

        let chains = store.materialize_chains().unwrap();
        let links = store.materialize_links(0).unwrap();
        let chain = chains.get(id).unwrap();
        let stats = store.stats(chain, &links.chain_view(id, None));
        assert_eq!(stats.longest_streak, 3);
        assert_eq!(stats.longest_gap, 7);
    }

    #[test]
    fn materialized_files_stay_locked() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.data_dir().join(LINK_FILE);

        let links = store.materialize_links(0).unwrap();
        assert!(FileLock::try_acquire(&path).unwrap().is_none());
        drop(links);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }
}
