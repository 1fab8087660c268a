use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::time::Duration;

/// UTC dates (midnight) at which a leap second had been inserted since the
/// GPS epoch.
const LEAP_SECONDS: [(i32, u32, u32); 18] = [
    (1981, 7, 1),
    (1982, 7, 1),
    (1983, 7, 1),
    (1985, 7, 1),
    (1988, 1, 1),
    (1990, 1, 1),
    (1991, 1, 1),
    (1992, 7, 1),
    (1993, 7, 1),
    (1994, 7, 1),
    (1996, 1, 1),
    (1997, 7, 1),
    (1999, 1, 1),
    (2006, 1, 1),
    (2009, 1, 1),
    (2012, 7, 1),
    (2015, 7, 1),
    (2017, 1, 1),
];

fn utc_midnight(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or_default()
}

/// 1980-01-06T00:00:00Z.
pub fn gps_epoch() -> DateTime<Utc> {
    utc_midnight(1980, 1, 6)
}

/// Time elapsed since the GPS epoch, including leap seconds. Instants before
/// the epoch map to zero.
pub fn time_since_gps_epoch(t: DateTime<Utc>) -> Duration {
    let base = (t - gps_epoch()).to_std().unwrap_or_default();
    let leaps = LEAP_SECONDS
        .iter()
        .filter(|(y, m, d)| t >= utc_midnight(*y, *m, *d))
        .count() as u64;
    base + Duration::from_secs(leaps)
}

/// GPS seconds truncated to 32 bits, as used by the application-layer packages.
pub fn gps_seconds_u32(t: DateTime<Utc>) -> u32 {
    (time_since_gps_epoch(t).as_secs() % (1u64 << 32)) as u32
}
