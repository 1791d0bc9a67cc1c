/// Observation dates carry no time of day.
pub type ObservationDate = chrono::NaiveDate;

/// Date substituted for frames without one when ordering by date.
///
/// Sorting absent dates as 1970-01-01 puts them before every real frame.
pub fn epoch_date() -> ObservationDate {
    chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Render an optional date the way group keys and logs display it.
pub fn display_date(date: Option<ObservationDate>) -> String {
    match date {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => crate::frame::ABSENT_TOKEN.to_string(),
    }
}
