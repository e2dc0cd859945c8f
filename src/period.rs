use crate::error::Error;
use chrono::{Datelike, Duration, NaiveDate};

/// Inclusive weekly reporting period, plus the previous period the summaries
/// compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingPeriod {
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

impl ReportingPeriod {
    pub fn explicit(begin: NaiveDate, end: NaiveDate) -> Result<Self, Error> {
        if begin > end {
            return Err(Error::StartDateAfterEndDate {
                start_date: begin.to_string(),
                end_date: end.to_string(),
            });
        }
        Ok(ReportingPeriod { begin, end })
    }

    /// Previous full week relative to `today`: Monday..Sunday, or
    /// Sunday..Saturday when `sun_sat` reporting is on. `last_week` shifts
    /// the whole calculation one week further back.
    pub fn derive(today: NaiveDate, last_week: bool, sun_sat: bool) -> Self {
        let today = if last_week {
            today - Duration::weeks(1)
        } else {
            today
        };
        let weekday = today.weekday().num_days_from_monday() as i64;

        if sun_sat {
            ReportingPeriod {
                begin: today - Duration::days(weekday + 1) - Duration::weeks(1),
                end: today - Duration::days(weekday + 2),
            }
        } else {
            ReportingPeriod {
                begin: today - Duration::days(weekday) - Duration::weeks(1),
                end: today - Duration::days(weekday + 1),
            }
        }
    }

    pub fn previous(&self) -> ReportingPeriod {
        ReportingPeriod {
            begin: self.begin - Duration::weeks(1),
            end: self.end - Duration::weeks(1),
        }
    }

    /// Exclusive lower bound used by incremental warehouse procedures.
    pub fn since_date(&self) -> String {
        let d = self.begin - Duration::days(1);
        format!("{}-{}-{}", d.year(), d.month(), d.day())
    }

    /// Label used in trigger-email subjects and bodies.
    pub fn date_span_label(&self) -> String {
        format!(
            "{}-{}-{} / {}-{}-{}",
            self.begin.month(),
            self.begin.day(),
            self.begin.year(),
            self.end.month(),
            self.end.day(),
            self.end.year()
        )
    }
}
