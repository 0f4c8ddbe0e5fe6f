//! Turning the dates a customer asked for into searchable windows.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::types::{DateWindow, RawWindow, TransportMode};

/// Decides which window, if any, can be searched for a requested range.
pub trait WindowPolicy: Send + Sync {
    fn adjust(&self, mode: TransportMode, raw: &RawWindow, today: NaiveDate)
        -> Option<DateWindow>;
}

/// A fixed ground-transport departure day and trip length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripPattern {
    pub departs: Weekday,
    pub nights: u32,
}

/// Flights and own-car trips keep the requested dates. Bus packages only run
/// on fixed patterns, so the departure moves to the nearest pattern day
/// (ties go forward) and the return follows the pattern length.
#[derive(Debug, Clone)]
pub struct WeekdayPatternPolicy {
    pub bus_patterns: Vec<TripPattern>,
    /// How far a bus departure may move from the requested date.
    pub max_shift_days: i64,
}

impl Default for WeekdayPatternPolicy {
    fn default() -> Self {
        Self {
            bus_patterns: vec![
                TripPattern {
                    departs: Weekday::Thu,
                    nights: 3,
                },
                TripPattern {
                    departs: Weekday::Sun,
                    nights: 4,
                },
            ],
            max_shift_days: 3,
        }
    }
}

impl WindowPolicy for WeekdayPatternPolicy {
    fn adjust(
        &self,
        mode: TransportMode,
        raw: &RawWindow,
        today: NaiveDate,
    ) -> Option<DateWindow> {
        match mode {
            TransportMode::Bus => self.bus_window(raw, today),
            TransportMode::Flight | TransportMode::OwnCar => {
                if raw.departure < today || raw.return_date <= raw.departure {
                    return None;
                }
                Some(DateWindow {
                    departure: raw.departure,
                    return_date: raw.return_date,
                })
            }
        }
    }
}

impl WeekdayPatternPolicy {
    fn bus_window(&self, raw: &RawWindow, today: NaiveDate) -> Option<DateWindow> {
        let mut best: Option<(i64, NaiveDate, u32)> = None;
        for pattern in &self.bus_patterns {
            for shift in -self.max_shift_days..=self.max_shift_days {
                let Some(date) = raw.departure.checked_add_signed(Duration::days(shift)) else {
                    continue;
                };
                if date.weekday() != pattern.departs || date < today {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((best_shift, _, _)) => {
                        shift.abs() < best_shift.abs()
                            || (shift.abs() == best_shift.abs() && shift > best_shift)
                    }
                };
                if better {
                    best = Some((shift, date, pattern.nights));
                }
            }
        }

        let (_, departure, nights) = best?;
        let return_date = departure.checked_add_signed(Duration::days(i64::from(nights)))?;
        Some(DateWindow {
            departure,
            return_date,
        })
    }
}

/// Mode-adjusted, de-duplicated windows in request order, capped at
/// `max_windows`.
pub fn derive_windows(
    policy: &dyn WindowPolicy,
    mode: TransportMode,
    raw_windows: &[RawWindow],
    max_windows: usize,
    today: NaiveDate,
) -> Vec<DateWindow> {
    let mut windows = Vec::new();
    for raw in raw_windows {
        if windows.len() >= max_windows {
            break;
        }
        let Some(window) = policy.adjust(mode, raw, today) else {
            continue;
        };
        if !windows.contains(&window) {
            windows.push(window);
        }
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn raw(departure: NaiveDate, return_date: NaiveDate) -> RawWindow {
        RawWindow {
            departure,
            return_date,
        }
    }

    // 2030-03-07 is a Thursday, 2030-03-10 a Sunday.
    const TODAY: (i32, u32, u32) = (2030, 1, 1);

    fn today() -> NaiveDate {
        day(TODAY.0, TODAY.1, TODAY.2)
    }

    #[test]
    fn flights_keep_requested_dates() {
        let policy = WeekdayPatternPolicy::default();
        let window = policy
            .adjust(
                TransportMode::Flight,
                &raw(day(2030, 3, 12), day(2030, 3, 15)),
                today(),
            )
            .unwrap();
        assert_eq!(window.departure, day(2030, 3, 12));
        assert_eq!(window.nights(), 3);
    }

    #[test]
    fn inverted_or_past_flight_windows_are_dropped() {
        let policy = WeekdayPatternPolicy::default();
        assert!(policy
            .adjust(
                TransportMode::Flight,
                &raw(day(2030, 3, 15), day(2030, 3, 12)),
                today()
            )
            .is_none());
        assert!(policy
            .adjust(
                TransportMode::Flight,
                &raw(day(2029, 3, 12), day(2029, 3, 15)),
                today()
            )
            .is_none());
    }

    #[test]
    fn bus_departures_snap_to_the_nearest_pattern_day() {
        let policy = WeekdayPatternPolicy::default();
        // Friday 2030-03-08 is one day after Thursday.
        let window = policy
            .adjust(
                TransportMode::Bus,
                &raw(day(2030, 3, 8), day(2030, 3, 12)),
                today(),
            )
            .unwrap();
        assert_eq!(window.departure, day(2030, 3, 7));
        assert_eq!(window.return_date, day(2030, 3, 10));
    }

    #[test]
    fn bus_ties_move_forward() {
        let policy = WeekdayPatternPolicy {
            bus_patterns: vec![TripPattern {
                departs: Weekday::Thu,
                nights: 3,
            }],
            max_shift_days: 3,
        };
        // Monday 2030-03-11: Thursday 2030-03-07 is 4 days back, 2030-03-14
        // is 3 days ahead.
        let window = policy
            .adjust(
                TransportMode::Bus,
                &raw(day(2030, 3, 11), day(2030, 3, 14)),
                today(),
            )
            .unwrap();
        assert_eq!(window.departure, day(2030, 3, 14));

        // Tuesday 2030-03-12 sits 2 days from Sunday 10th and Thursday 14th.
        let both = WeekdayPatternPolicy::default();
        let window = both
            .adjust(
                TransportMode::Bus,
                &raw(day(2030, 3, 12), day(2030, 3, 15)),
                today(),
            )
            .unwrap();
        assert_eq!(window.departure, day(2030, 3, 14));
    }

    #[test]
    fn derived_windows_are_unique_and_capped() {
        let policy = WeekdayPatternPolicy::default();
        let raws = vec![
            raw(day(2030, 3, 7), day(2030, 3, 10)),
            raw(day(2030, 3, 8), day(2030, 3, 11)),
            raw(day(2030, 3, 17), day(2030, 3, 21)),
            raw(day(2030, 3, 28), day(2030, 3, 31)),
            raw(day(2030, 4, 4), day(2030, 4, 7)),
        ];
        let windows = derive_windows(&policy, TransportMode::Bus, &raws, 3, today());
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].departure, day(2030, 3, 7));
        assert_eq!(windows[1].departure, day(2030, 3, 17));
        assert_eq!(windows[2].departure, day(2030, 3, 28));
    }

    #[test]
    fn zero_cap_yields_no_windows() {
        let raws = vec![raw(day(2030, 3, 10), day(2030, 3, 15))];
        let policy = WeekdayPatternPolicy::default();
        assert!(derive_windows(&policy, TransportMode::Flight, &raws, 0, today()).is_empty());
        assert_eq!(
            derive_windows(&policy, TransportMode::Flight, &raws, 1, today()).len(),
            1
        );
    }
}
