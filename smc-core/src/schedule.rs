use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, TimeZone};

use crate::config::ScheduleSection;

/// Outcome of checking the daily play window at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness<Tz: TimeZone> {
    /// The window is open right now.
    pub open: bool,
    /// Time left until the next window start. Zero when open.
    pub wait: Duration,
    /// How long the cycle plays once started.
    pub play: Duration,
    /// Instant the cycle is expected to start (`now + wait`).
    pub starts_at: DateTime<Tz>,
}

impl ScheduleSection {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_minutes.saturating_mul(60))
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_hours.saturating_mul(3600))
    }

    pub fn readiness<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Readiness<Tz> {
        let window = to_chrono(self.duration());
        let today = self.start_on(now.date_naive(), now);

        // A window longer than what is left of the previous day spills over midnight.
        let yesterday = now
            .date_naive()
            .checked_sub_days(Days::new(1))
            .map(|date| self.start_on(date, now));
        for start in [Some(today.clone()), yesterday].into_iter().flatten() {
            let end = start.clone() + window;
            if start <= *now && *now < end {
                return Readiness {
                    open: true,
                    wait: Duration::ZERO,
                    play: to_std(end - now.clone()),
                    starts_at: now.clone(),
                };
            }
        }

        let next = if *now < today {
            today
        } else {
            today + to_chrono(self.period())
        };
        let wait = to_std(next.clone() - now.clone());
        Readiness {
            open: false,
            wait,
            play: self.duration(),
            starts_at: next,
        }
    }

    fn start_on<Tz: TimeZone>(&self, date: NaiveDate, now: &DateTime<Tz>) -> DateTime<Tz> {
        let naive = date.and_time(self.start);
        let tz = now.timezone();
        naive
            .and_local_timezone(tz.clone())
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(5200))
}

fn to_std(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}
