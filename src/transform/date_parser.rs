use chrono::{Duration, NaiveDate, NaiveDateTime};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%d.%m.%Y"];

/// Parse a date-time written the way workbooks and exports write them.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| parse_plain_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Parse a calendar date, accepting a trailing time component.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    parse_plain_date(s).or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_plain_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

/// Convert an Excel serial day number (1900 date system) into a date.
/// Fractional parts (time of day) are dropped.
pub fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    // 1 = 1900-01-01, 2958465 = 9999-12-31
    if !serial.is_finite() || !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    // counting from 1899-12-30 is exact from 1900-03-01 on (Excel's phantom 1900-02-29)
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}
