//! Link ledger — completion marks kept in local-day order.
//!
//! On disk, links are grouped into day buckets: ascending by local calendar
//! day, and within one day in insertion order. A chain has at most one link
//! per local day. Finding a slot is a binary search for the first link of
//! the day followed by a linear scan of that day's bucket, which is bounded
//! by the number of chains rather than the number of links.
//!
//! Read-side consumers (stats, listing) work on a [`LinkView`], a copy
//! re-sorted by `(chain_id, timestamp)`. The two orderings are never mixed:
//! searches on the ledger use day order, searches on a view use chain order.

use std::path::Path;

use tracing::debug;

use super::codec::{Link, LinkHeader};
use super::error::{StoreError, StoreResult};
use super::record_file::RecordFile;
use super::verify::{self, Violation};
use crate::calendar::{timestamp_in_range, Calendar, DayId, SystemCalendar};

/// Where a `(chain, day)` pair lives or would be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Index of the existing link if occupied, otherwise the insertion point
    /// (end of the day bucket).
    pub position: usize,
    pub occupied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Added,
    /// The chain already has a link on that day. Nothing changed.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkOutcome {
    Removed,
    NotFound,
}

/// The materialized link file.
#[derive(Debug)]
pub struct LinkLedger<C = SystemCalendar> {
    file: RecordFile<LinkHeader, Link>,
    calendar: C,
}

impl<C: Calendar> LinkLedger<C> {
    /// Load the link file, with room for `extra_capacity` inserts.
    pub fn materialize(path: &Path, extra_capacity: usize, calendar: C) -> StoreResult<Self> {
        let file = RecordFile::materialize(path, extra_capacity)?;
        Ok(Self { file, calendar })
    }

    fn day_of(&self, link: &Link) -> DayId {
        self.calendar.local_day(link.timestamp)
    }

    pub fn find_slot(&self, chain_id: u16, timestamp: i64) -> Slot {
        let day = self.calendar.local_day(timestamp);
        let links = self.file.records();

        let mut position = links.partition_point(|l| self.day_of(l) < day);
        while let Some(link) = links.get(position) {
            if self.day_of(link) != day {
                break;
            }
            if link.chain_id == chain_id {
                return Slot {
                    position,
                    occupied: true,
                };
            }
            position += 1;
        }

        Slot {
            position,
            occupied: false,
        }
    }

    /// Mark `chain_id` done on the local day containing `timestamp`.
    ///
    /// Both `timestamp` and its local midnight must be storable, otherwise
    /// the link could not be read back.
    pub fn add(&mut self, chain_id: u16, timestamp: i64, tags: u8) -> StoreResult<LinkOutcome> {
        let normalized = self.calendar.start_of_day_local(timestamp);
        if !timestamp_in_range(timestamp) || !timestamp_in_range(normalized) {
            return Err(StoreError::InvalidTimestamp(timestamp));
        }
        let timestamp = normalized;
        let slot = self.find_slot(chain_id, timestamp);
        if slot.occupied {
            debug!(
                "chain {chain_id} already linked on {}, skipping",
                self.calendar.local_day(timestamp)
            );
            return Ok(LinkOutcome::AlreadyExists);
        }

        let count = self
            .file
            .header()
            .count
            .checked_add(1)
            .ok_or(StoreError::CapacityExceeded {
                what: "link store",
                max: u16::MAX as usize,
            })?;

        self.file.insert(
            slot.position,
            Link {
                chain_id,
                tags,
                timestamp,
            },
        );
        self.file.header_mut().count = count;
        Ok(LinkOutcome::Added)
    }

    /// Remove `chain_id`'s link on the local day containing `timestamp`.
    pub fn remove(&mut self, chain_id: u16, timestamp: i64) -> UnlinkOutcome {
        let slot = self.find_slot(chain_id, timestamp);
        if !slot.occupied {
            return UnlinkOutcome::NotFound;
        }
        self.file.remove(slot.position);
        let header = self.file.header_mut();
        header.count = header.count.saturating_sub(1);
        UnlinkOutcome::Removed
    }

    /// Replace the tag bitmap of an existing link. `false` if there is none.
    pub fn set_tags(&mut self, chain_id: u16, timestamp: i64, tags: u8) -> bool {
        let slot = self.find_slot(chain_id, timestamp);
        if !slot.occupied {
            return false;
        }
        match self.file.get_mut(slot.position) {
            Some(link) => {
                link.tags = tags;
                true
            }
            None => false,
        }
    }

    /// Clear `bit` from every link of `chain_id`. Returns how many changed.
    pub fn clear_tag(&mut self, chain_id: u16, bit: u8) -> usize {
        let hits: Vec<usize> = self
            .file
            .records()
            .iter()
            .enumerate()
            .filter(|(_, l)| l.chain_id == chain_id && l.tags & bit != 0)
            .map(|(i, _)| i)
            .collect();
        for &index in &hits {
            if let Some(link) = self.file.get_mut(index) {
                link.tags &= !bit;
            }
        }
        hits.len()
    }

    pub fn get(&self, chain_id: u16, timestamp: i64) -> Option<&Link> {
        let slot = self.find_slot(chain_id, timestamp);
        slot.occupied.then(|| &self.file.records()[slot.position])
    }

    /// Links in on-disk (day bucket) order.
    pub fn links(&self) -> &[Link] {
        self.file.records()
    }

    pub fn len(&self) -> usize {
        self.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    pub fn calendar(&self) -> &C {
        &self.calendar
    }

    /// Chain-ordered copy of every link.
    pub fn view(&self) -> LinkView {
        LinkView::new(self.file.records())
    }

    /// One chain's links in ascending time, optionally starting at `from`.
    pub fn chain_view(&self, chain_id: u16, from: Option<DayId>) -> Vec<Link> {
        let view = self.view();
        match from {
            Some(day) => view.chain_since(chain_id, day, &self.calendar).to_vec(),
            None => view.chain(chain_id).to_vec(),
        }
    }

    /// Every link in ascending time, regardless of chain.
    pub fn chronological(&self) -> Vec<Link> {
        let mut links = self.file.records().to_vec();
        links.sort_by_key(|l| l.timestamp);
        links
    }

    pub fn verify(&self) -> Result<(), Violation> {
        verify::verify_links(self.file.header(), self.file.records(), &self.calendar)
    }

    /// Write back changed links. Debug builds verify the whole ledger first
    /// and abort on any inconsistency.
    pub fn persist(&mut self) -> StoreResult<bool> {
        #[cfg(debug_assertions)]
        verify::assert_consistent(self.file.header(), self.file.records(), &self.calendar);
        self.file.persist()
    }

    pub fn dirty_offset(&self) -> Option<usize> {
        self.file.dirty_offset()
    }
}

/// Links sorted by `(chain_id, timestamp)`, with per-chain ranges found by
/// binary search. A transient derivative; never persisted in this order.
#[derive(Debug, Clone, Default)]
pub struct LinkView {
    links: Vec<Link>,
}

impl LinkView {
    pub fn new(links: &[Link]) -> Self {
        let mut links = links.to_vec();
        links.sort_by_key(|l| (l.chain_id, l.timestamp));
        Self { links }
    }

    fn chain_start(&self, chain_id: u16) -> usize {
        self.links.partition_point(|l| l.chain_id < chain_id)
    }

    fn chain_end(&self, chain_id: u16) -> usize {
        self.links.partition_point(|l| l.chain_id <= chain_id)
    }

    pub fn chain(&self, chain_id: u16) -> &[Link] {
        &self.links[self.chain_start(chain_id)..self.chain_end(chain_id)]
    }

    /// `chain_id`'s links on or after local day `from`.
    pub fn chain_since<C: Calendar>(&self, chain_id: u16, from: DayId, calendar: &C) -> &[Link] {
        let links = self.chain(chain_id);
        let skip = links.partition_point(|l| calendar.local_day(l.timestamp) < from);
        &links[skip..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedCalendar;
    use tempfile::TempDir;

    const DAY: i64 = 86_400;
    const JAN_1: i64 = 1_704_067_200;

    fn day(n: i64) -> i64 {
        JAN_1 + (n - 1) * DAY
    }

    fn open(dir: &TempDir) -> LinkLedger<FixedCalendar> {
        LinkLedger::materialize(&dir.path().join("links.bin"), 8, FixedCalendar::utc(day(20)))
            .unwrap()
    }

    fn chains_of(ledger: &LinkLedger<FixedCalendar>) -> Vec<(u16, i64)> {
        ledger
            .links()
            .iter()
            .map(|l| (l.chain_id, (l.timestamp - JAN_1) / DAY + 1))
            .collect()
    }

    #[test]
    fn find_slot_on_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        assert_eq!(
            ledger.find_slot(3, day(5)),
            Slot {
                position: 0,
                occupied: false
            }
        );
    }

    #[test]
    fn add_keeps_day_order_and_appends_to_bucket() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);

        ledger.add(1, day(3), 0).unwrap();
        ledger.add(1, day(1), 0).unwrap();
        ledger.add(2, day(3), 0).unwrap();
        ledger.add(3, day(2), 0).unwrap();
        ledger.add(3, day(3), 0).unwrap();

        assert_eq!(
            chains_of(&ledger),
            vec![(1, 1), (3, 2), (1, 3), (2, 3), (3, 3)]
        );
        assert_eq!(ledger.verify(), Ok(()));
    }

    #[test]
    fn add_normalizes_to_local_midnight() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);
        ledger.add(1, day(4) + 13 * 3600, 0).unwrap();
        assert_eq!(ledger.links()[0].timestamp, day(4));
    }

    #[test]
    fn add_rejects_unstorable_timestamps() {
        use crate::calendar::{MAX_TIMESTAMP, MIN_TIMESTAMP};

        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);
        for ts in [i64::MIN, i64::MAX, MIN_TIMESTAMP - 1, MAX_TIMESTAMP + 1] {
            let err = ledger.add(1, ts, 0).unwrap_err();
            assert!(matches!(err, StoreError::InvalidTimestamp(t) if t == ts));
            assert!(err.is_user_error());
        }
        assert!(ledger.is_empty());
        assert_eq!(ledger.dirty_offset(), None);

        // Local midnight of the first storable instant falls a day earlier
        // west of UTC.
        let path = dir.path().join("west.bin");
        let west = FixedCalendar::new(-5 * 3600, 0).unwrap();
        let mut ledger = LinkLedger::materialize(&path, 1, west).unwrap();
        assert!(matches!(
            ledger.add(1, MIN_TIMESTAMP, 0),
            Err(StoreError::InvalidTimestamp(_))
        ));

        assert_eq!(ledger.add(1, MAX_TIMESTAMP, 0).unwrap(), LinkOutcome::Added);
        ledger.persist().unwrap();
        drop(ledger);
        let ledger = LinkLedger::materialize(&path, 0, west).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn second_add_same_day_is_reported_and_skipped() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);

        assert_eq!(ledger.add(1, day(2), 0).unwrap(), LinkOutcome::Added);
        assert_eq!(
            ledger.add(1, day(2) + 7200, 0b1).unwrap(),
            LinkOutcome::AlreadyExists
        );
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.links()[0].tags, 0);
    }

    #[test]
    fn find_slot_reports_existing_position() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);
        ledger.add(1, day(1), 0).unwrap();
        ledger.add(1, day(2), 0).unwrap();
        ledger.add(2, day(2), 0).unwrap();

        assert_eq!(
            ledger.find_slot(2, day(2)),
            Slot {
                position: 2,
                occupied: true
            }
        );
        assert_eq!(
            ledger.find_slot(3, day(2)),
            Slot {
                position: 3,
                occupied: false
            }
        );
        assert_eq!(
            ledger.find_slot(3, day(1)),
            Slot {
                position: 1,
                occupied: false
            }
        );
    }

    #[test]
    fn remove_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);
        ledger.add(1, day(1), 0).unwrap();
        assert_eq!(ledger.remove(2, day(1)), UnlinkOutcome::NotFound);
        assert_eq!(ledger.remove(1, day(2)), UnlinkOutcome::NotFound);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn remove_lowers_dirty_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.bin");
        {
            let mut ledger = open(&dir);
            for n in 1..=4 {
                ledger.add(1, day(n), 0).unwrap();
            }
            ledger.persist().unwrap();
        }

        let mut ledger = LinkLedger::materialize(&path, 0, FixedCalendar::utc(day(20))).unwrap();
        assert_eq!(ledger.dirty_offset(), None);
        assert_eq!(ledger.remove(1, day(2)), UnlinkOutcome::Removed);
        assert_eq!(ledger.dirty_offset(), Some(1));
        ledger.persist().unwrap();
        drop(ledger);

        let ledger = LinkLedger::materialize(&path, 0, FixedCalendar::utc(day(20))).unwrap();
        assert_eq!(chains_of(&ledger), vec![(1, 1), (1, 3), (1, 4)]);
    }

    #[test]
    fn set_and_clear_tags() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);
        ledger.add(1, day(1), 0b011).unwrap();
        ledger.add(1, day(2), 0b010).unwrap();
        ledger.add(2, day(2), 0b010).unwrap();

        assert!(ledger.set_tags(1, day(2), 0b110));
        assert!(!ledger.set_tags(1, day(3), 0b1));
        assert_eq!(ledger.clear_tag(1, 0b010), 2);

        let tags: Vec<u8> = ledger.links().iter().map(|l| l.tags).collect();
        assert_eq!(tags, vec![0b001, 0b100, 0b010]);
        assert_eq!(ledger.get(1, day(2)).map(|l| l.tags), Some(0b100));
    }

    #[test]
    fn chain_view_carves_one_chain_in_time_order() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);
        for (chain, n) in [(2, 5), (1, 4), (2, 1), (1, 2), (3, 3), (1, 9)] {
            ledger.add(chain, day(n), 0).unwrap();
        }

        let view = ledger.view();
        let days = |links: &[Link]| -> Vec<i64> {
            links.iter().map(|l| (l.timestamp - JAN_1) / DAY + 1).collect()
        };
        assert_eq!(days(view.chain(1)), vec![2, 4, 9]);
        assert_eq!(days(view.chain(2)), vec![1, 5]);
        assert!(view.chain(7).is_empty());

        let from = ledger.calendar().local_day(day(4));
        assert_eq!(days(&ledger.chain_view(1, Some(from))), vec![4, 9]);
        assert_eq!(days(&ledger.chronological()), vec![1, 2, 3, 4, 5, 9]);
    }

    #[test]
    fn persist_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.bin");
        let before = {
            let mut ledger = open(&dir);
            ledger.add(2, day(2), 0b1).unwrap();
            ledger.add(1, day(1), 0).unwrap();
            ledger.add(1, day(2), 0).unwrap();
            assert!(ledger.persist().unwrap());
            assert!(!ledger.persist().unwrap());
            ledger.links().to_vec()
        };

        let ledger = LinkLedger::materialize(&path, 0, FixedCalendar::utc(day(20))).unwrap();
        assert_eq!(ledger.links(), before.as_slice());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "refusing to persist")]
    fn persist_aborts_on_corrupted_ledger() {
        let dir = TempDir::new().unwrap();
        let mut ledger = open(&dir);
        ledger.add(1, day(1), 0).unwrap();
        ledger.file.push(Link::new(1, day(1)));
        ledger.file.header_mut().count = 2;
        let _ = ledger.persist();
    }
}
