//! MS-DOS date/time stamps used by ZIP headers.
//!
//! DOS stamps have a 2-second resolution and cover 1980-01-01 through
//! 2107-12-31. Conversions here treat the stamp as UTC.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds from the Unix epoch to 1980-01-01 00:00:00 UTC.
const DOS_EPOCH_UNIX_SECS: i64 = 315_532_800;

/// Last second representable by a DOS stamp (2107-12-31 23:59:58 UTC).
const DOS_MAX_UNIX_SECS: i64 = 4_354_819_198;

/// A DOS date/time pair as stored in local and central headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosTime {
    /// Packed time: hour << 11 | minute << 5 | second / 2.
    pub time: u16,
    /// Packed date: (year - 1980) << 9 | month << 5 | day.
    pub date: u16,
}

impl DosTime {
    /// 1980-01-01 00:00:00, written when timestamps are disabled.
    pub const EPOCH: DosTime = DosTime {
        time: 0,
        date: (1 << 5) | 1,
    };

    /// Creates a stamp from its raw header fields.
    pub const fn new(time: u16, date: u16) -> Self {
        Self { time, date }
    }

    /// Converts Unix seconds, clamping to the DOS range.
    pub fn from_unix_secs(secs: i64) -> Self {
        let secs = secs.clamp(DOS_EPOCH_UNIX_SECS, DOS_MAX_UNIX_SECS);
        let days = secs.div_euclid(86_400);
        let of_day = secs.rem_euclid(86_400);
        let (year, month, day) = civil_from_days(days);

        let hour = (of_day / 3600) as u16;
        let minute = ((of_day % 3600) / 60) as u16;
        let second = (of_day % 60) as u16;

        Self {
            time: (hour << 11) | (minute << 5) | (second / 2),
            date: (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16,
        }
    }

    /// Converts a system time, clamping to the DOS range.
    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => DOS_EPOCH_UNIX_SECS,
        };
        Self::from_unix_secs(secs)
    }

    /// The current time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Converts back to Unix seconds.
    pub fn to_unix_secs(&self) -> i64 {
        let year = 1980 + (self.date >> 9) as i64;
        let month = ((self.date >> 5) & 0x0F).clamp(1, 12) as u32;
        let day = (self.date & 0x1F).max(1) as u32;
        let hour = (self.time >> 11) as i64;
        let minute = ((self.time >> 5) & 0x3F) as i64;
        let second = ((self.time & 0x1F) * 2) as i64;
        days_from_civil(year, month, day) * 86_400 + hour * 3600 + minute * 60 + second
    }
}

impl Default for DosTime {
    fn default() -> Self {
        Self::EPOCH
    }
}

// Proleptic Gregorian conversions (Howard Hinnant's algorithms).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let m = m as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
