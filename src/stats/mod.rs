//! Chain statistics — streaks, gaps and fulfillment from a chain's links.
//!
//! Both cadences reduce to a sequence of periods, each satisfied or not:
//! - Daily: one period per local day, from the first link through the day
//!   before the end day (today, or the day the chain was stopped). The end
//!   day itself only counts if it already has a link.
//! - Weekly: one period per Monday-based week, from the first through the
//!   last week with any link. A week is satisfied with at least `min_days`
//!   links. Week numbers run on across year boundaries.
//!
//! The period sequence is then summarized the same way for either kind.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::calendar::{Calendar, DayId};
use crate::store::codec::{Chain, ChainKind, Link};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChainStats {
    /// Longest run of satisfied periods.
    pub longest_streak: u32,
    /// Satisfied periods ending at the last period in range.
    pub current_streak: u32,
    /// Longest run of unsatisfied periods.
    pub longest_gap: u32,
    /// Number of unsatisfied runs, including an open trailing one.
    pub times_broken: u32,
    pub periods_linked: u32,
    pub periods_total: u32,
    /// `periods_linked / periods_total` as a percentage.
    pub fulfillment: f64,
}

/// Compute stats for `chain` from its links in ascending time order.
pub fn compute_stats<C: Calendar>(chain: &Chain, links: &[Link], calendar: &C) -> ChainStats {
    let days: Vec<DayId> = links
        .iter()
        .map(|l| calendar.local_day(l.timestamp))
        .collect();

    let periods = match chain.kind {
        ChainKind::Daily => {
            let end = calendar.local_day(chain.stopped.unwrap_or_else(|| calendar.now_utc()));
            daily_periods(&days, end)
        }
        ChainKind::Weekly { min_days } => weekly_periods(&days, min_days),
    };
    summarize(&periods)
}

fn daily_periods(days: &[DayId], end: DayId) -> Vec<bool> {
    let (Some(&first), Some(&last)) = (days.first(), days.last()) else {
        return Vec::new();
    };
    let last_covered = last.max(DayId(end.0 - 1));

    let mut periods = vec![false; (last_covered.0 - first.0 + 1) as usize];
    for day in days {
        if let Some(p) = periods.get_mut((day.0 - first.0) as usize) {
            *p = true;
        }
    }
    periods
}

fn weekly_periods(days: &[DayId], min_days: u8) -> Vec<bool> {
    let mut per_week: BTreeMap<i64, u32> = BTreeMap::new();
    for day in days {
        *per_week.entry(day.week()).or_default() += 1;
    }
    let (Some((&first, _)), Some((&last, _))) =
        (per_week.first_key_value(), per_week.last_key_value())
    else {
        return Vec::new();
    };

    (first..=last)
        .map(|week| per_week.get(&week).copied().unwrap_or(0) >= min_days as u32)
        .collect()
}

fn summarize(periods: &[bool]) -> ChainStats {
    let mut stats = ChainStats::default();
    let mut run = 0u32;
    let mut gap = 0u32;

    for &satisfied in periods {
        if satisfied {
            run += 1;
            gap = 0;
            stats.periods_linked += 1;
            stats.longest_streak = stats.longest_streak.max(run);
        } else {
            if gap == 0 {
                stats.times_broken += 1;
            }
            gap += 1;
            run = 0;
            stats.longest_gap = stats.longest_gap.max(gap);
        }
    }

    stats.current_streak = run;
    stats.periods_total = periods.len() as u32;
    if stats.periods_total > 0 {
        stats.fulfillment = stats.periods_linked as f64 * 100.0 / stats.periods_total as f64;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedCalendar;
    use crate::store::codec::Color;

    const DAY: i64 = 86_400;
    const JAN_1: i64 = 1_704_067_200;

    fn chain(kind: ChainKind) -> Chain {
        Chain {
            id: 0,
            name: "habit".into(),
            created: JAN_1,
            kind,
            color: Color::DEFAULT,
            tags: Vec::new(),
            stopped: None,
        }
    }

    fn links_on(days: &[i64]) -> Vec<Link> {
        days.iter().map(|d| Link::new(0, JAN_1 + (d - 1) * DAY)).collect()
    }

    /// Calendar whose "now" is noon on January `day`, 2024.
    fn at(day: i64) -> FixedCalendar {
        FixedCalendar::utc(JAN_1 + (day - 1) * DAY + 12 * 3600)
    }

    #[test]
    fn no_links_no_stats() {
        let stats = compute_stats(&chain(ChainKind::Daily), &[], &at(5));
        assert_eq!(stats, ChainStats::default());
    }

    #[test]
    fn daily_gap_of_a_week() {
        let stats = compute_stats(&chain(ChainKind::Daily), &links_on(&[1, 2, 3, 10]), &at(11));
        assert_eq!(stats.longest_streak, 3);
        assert_eq!(stats.longest_gap, 6);
        assert_eq!(stats.times_broken, 1);
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.periods_total, 10);
        assert!((stats.fulfillment - 40.0).abs() < 1e-9);
    }

    #[test]
    fn daily_trailing_gap_counts_as_broken() {
        let stats = compute_stats(&chain(ChainKind::Daily), &links_on(&[1, 2]), &at(6));
        // Days 3, 4 and 5 missed; today (6) still open.
        assert_eq!(stats.longest_gap, 3);
        assert_eq!(stats.times_broken, 1);
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.periods_total, 5);
    }

    #[test]
    fn daily_today_not_yet_linked_is_not_a_break() {
        let stats = compute_stats(&chain(ChainKind::Daily), &links_on(&[1, 2, 3]), &at(4));
        assert_eq!(stats.times_broken, 0);
        assert_eq!(stats.longest_streak, 3);
        assert!((stats.fulfillment - 100.0).abs() < 1e-9);
    }

    #[test]
    fn daily_stopped_chain_ends_at_stop_day() {
        let mut c = chain(ChainKind::Daily);
        c.stopped = Some(JAN_1 + 4 * DAY); // Jan 5
        let stats = compute_stats(&c, &links_on(&[1, 2]), &at(30));
        assert_eq!(stats.longest_gap, 2);
        assert_eq!(stats.periods_total, 4);
    }

    #[test]
    fn weekly_counts_satisfied_weeks() {
        // 2024-01-01 is a Monday. Week 1: 3 links, week 2: 1, week 3: none,
        // week 4: 2.
        let links = links_on(&[1, 3, 5, 9, 22, 24]);
        let stats = compute_stats(&chain(ChainKind::Weekly { min_days: 2 }), &links, &at(30));
        assert_eq!(stats.periods_total, 4);
        assert_eq!(stats.periods_linked, 2);
        assert_eq!(stats.longest_streak, 1);
        assert_eq!(stats.longest_gap, 2);
        assert_eq!(stats.times_broken, 1);
        assert!((stats.fulfillment - 50.0).abs() < 1e-9);
    }

    #[test]
    fn weekly_streak_spans_new_year() {
        let cal = FixedCalendar::utc(JAN_1 + 400 * DAY);
        let day = |y, m, d| cal.midnight(DayId::from_ymd(y, m, d).unwrap());
        let links: Vec<Link> = [
            day(2024, 12, 23),
            day(2024, 12, 27),
            day(2024, 12, 30),
            day(2025, 1, 2),
            day(2025, 1, 7),
            day(2025, 1, 9),
        ]
        .into_iter()
        .map(|ts| Link::new(0, ts))
        .collect();

        let stats = compute_stats(&chain(ChainKind::Weekly { min_days: 2 }), &links, &cal);
        assert_eq!(stats.periods_total, 3);
        assert_eq!(stats.longest_streak, 3);
        assert_eq!(stats.times_broken, 0);
    }
}
