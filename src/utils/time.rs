
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};


/// This is the standard way of converting a date to a string in onloq.
pub fn date_to_record_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Returns start of the day.
pub fn day_start<Tz: TimeZone>(date: DateTime<Tz>) -> DateTime<Tz> {
    date.with_time(NaiveTime::MIN).earliest().unwrap_or(date)
}

/// Formats a duration as `Xh Ym`.
pub fn format_hours_minutes(duration: Duration) -> String {
    format!("{}h {}m", duration.num_hours(), duration.num_minutes() % 60)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::{date_to_record_name, format_hours_minutes};

    #[test]
    fn test_record_name() {
        let date = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();
        assert_eq!(date_to_record_name(date), "2018-07-04");
    }

    #[test]
    fn test_format_hours_minutes() {
        assert_eq!(format_hours_minutes(Duration::seconds(3 * 3600 + 25 * 60 + 10)), "3h 25m");
        assert_eq!(format_hours_minutes(Duration::zero()), "0h 0m");
    }
}
