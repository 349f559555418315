//! Consistency verifier — full scan of the link file before it is persisted.
//!
//! Catches bugs in the ledger (and hand-edited files), not user mistakes.
//! A violation here means the in-memory state must not reach disk.

use std::collections::HashSet;

use thiserror::Error;

use super::codec::{Link, LinkHeader};
use crate::calendar::{Calendar, DayId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("chain {chain_id} linked twice on {day} (records {first} and {second})")]
    DuplicateDay {
        chain_id: u16,
        day: DayId,
        first: usize,
        second: usize,
    },

    #[error("header declares {declared} links, found {scanned}")]
    CountMismatch { declared: usize, scanned: usize },

    #[error("record {index} on {day} is stored after a later day {previous}")]
    OutOfOrder {
        index: usize,
        day: DayId,
        previous: DayId,
    },
}

/// Scan `links` against their header. Checks count, day ordering, and
/// per-(chain, day) uniqueness.
pub fn verify_links<C: Calendar>(
    header: &LinkHeader,
    links: &[Link],
    calendar: &C,
) -> Result<(), Violation> {
    if header.count as usize != links.len() {
        return Err(Violation::CountMismatch {
            declared: header.count as usize,
            scanned: links.len(),
        });
    }

    let mut seen: HashSet<(u16, DayId)> = HashSet::with_capacity(links.len());
    let mut previous: Option<DayId> = None;
    let mut block_start = 0;

    for (index, link) in links.iter().enumerate() {
        let day = calendar.local_day(link.timestamp);
        if let Some(prev) = previous {
            if day < prev {
                return Err(Violation::OutOfOrder {
                    index,
                    day,
                    previous: prev,
                });
            }
            if day != prev {
                block_start = index;
            }
        }
        previous = Some(day);

        if !seen.insert((link.chain_id, day)) {
            let first = links[block_start..index]
                .iter()
                .position(|l| l.chain_id == link.chain_id)
                .map_or(block_start, |p| block_start + p);
            return Err(Violation::DuplicateDay {
                chain_id: link.chain_id,
                day,
                first,
                second: index,
            });
        }
    }

    Ok(())
}

/// Abort on any violation.
pub fn assert_consistent<C: Calendar>(header: &LinkHeader, links: &[Link], calendar: &C) {
    if let Err(violation) = verify_links(header, links, calendar) {
        panic!("link store inconsistent, refusing to persist: {violation}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedCalendar;

    const DAY: i64 = 86_400;
    const JAN_1: i64 = 1_704_067_200;

    fn cal() -> FixedCalendar {
        FixedCalendar::utc(JAN_1)
    }

    fn header(count: usize) -> LinkHeader {
        LinkHeader {
            count: count as u16,
        }
    }

    #[test]
    fn consistent_links_pass() {
        let links = [
            Link::new(1, JAN_1),
            Link::new(2, JAN_1),
            Link::new(1, JAN_1 + DAY),
        ];
        assert_eq!(verify_links(&header(3), &links, &cal()), Ok(()));
        assert_eq!(verify_links(&header(0), &[], &cal()), Ok(()));
    }

    #[test]
    fn duplicate_day_is_reported() {
        // Same local day, different instants.
        let links = [
            Link::new(1, JAN_1),
            Link::new(2, JAN_1),
            Link::new(1, JAN_1 + 3600),
        ];
        let err = verify_links(&header(3), &links, &cal()).unwrap_err();
        assert_eq!(
            err,
            Violation::DuplicateDay {
                chain_id: 1,
                day: DayId::from_ymd(2024, 1, 1).unwrap(),
                first: 0,
                second: 2,
            }
        );
    }

    #[test]
    fn count_mismatch_is_reported() {
        let links = [Link::new(1, JAN_1)];
        assert_eq!(
            verify_links(&header(2), &links, &cal()),
            Err(Violation::CountMismatch {
                declared: 2,
                scanned: 1
            })
        );
    }

    #[test]
    fn out_of_order_is_reported() {
        let links = [Link::new(1, JAN_1 + DAY), Link::new(2, JAN_1)];
        assert!(matches!(
            verify_links(&header(2), &links, &cal()),
            Err(Violation::OutOfOrder { index: 1, .. })
        ));
    }

    #[test]
    #[should_panic(expected = "refusing to persist")]
    fn assert_consistent_aborts() {
        let links = [Link::new(1, JAN_1), Link::new(1, JAN_1)];
        assert_consistent(&header(2), &links, &cal());
    }
}
