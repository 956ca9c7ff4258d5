use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

pub const PASSING_AVERAGE: f64 = 75.0;

/// 1-decimal half-up rounding used for every derived average:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Remark {
    Passed,
    Failed,
}

impl Remark {
    pub fn for_average(avg: f64) -> Self {
        if avg >= PASSING_AVERAGE {
            Remark::Passed
        } else {
            Remark::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Remark::Passed => "Passed",
            Remark::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub final_average: f64,
    pub remarks: Remark,
}

/// Mean of the entered quarters. A quarter of 0 (or below) is "not yet entered"
/// and does not count toward the denominator.
pub fn aggregate_quarters(quarters: [f64; 4]) -> GradeSummary {
    let entered: Vec<f64> = quarters.iter().copied().filter(|q| *q > 0.0).collect();
    let final_average = if entered.is_empty() {
        0.0
    } else {
        round_off_1_decimal(entered.iter().sum::<f64>() / entered.len() as f64)
    };
    GradeSummary {
        final_average,
        remarks: Remark::for_average(final_average),
    }
}

/// SF9 general average across subject finals; subjects without any entered
/// quarter (final 0) are left out.
pub fn general_average<I>(finals: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0;
    let mut n = 0usize;
    for f in finals {
        if f > 0.0 {
            sum += f;
            n += 1;
        }
    }
    if n == 0 {
        None
    } else {
        Some(round_off_1_decimal(sum / n as f64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Late,
        AttendanceStatus::Excused,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            "excused" => Some(Self::Excused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthAttendance {
    pub month: String,
    pub school_days: u32,
    pub days_present: u32,
    pub days_absent: u32,
}

/// Per-month tally for the SF9 attendance panel. Late counts as present,
/// excused counts as absent. Months come back in calendar order.
pub fn summarize_attendance<I>(records: I) -> Vec<MonthAttendance>
where
    I: IntoIterator<Item = (NaiveDate, AttendanceStatus)>,
{
    let mut by_month: BTreeMap<String, MonthAttendance> = BTreeMap::new();
    for (date, status) in records {
        let key = date.format("%Y-%m").to_string();
        let entry = by_month
            .entry(key.clone())
            .or_insert_with(|| MonthAttendance {
                month: key,
                school_days: 0,
                days_present: 0,
                days_absent: 0,
            });
        entry.school_days += 1;
        match status {
            AttendanceStatus::Present | AttendanceStatus::Late => entry.days_present += 1,
            AttendanceStatus::Absent | AttendanceStatus::Excused => entry.days_absent += 1,
        }
    }
    by_month.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn round_off_is_half_up() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(3.54), 3.5);
        assert_eq!(round_off_1_decimal(3.55), 3.6);
        assert_eq!(round_off_1_decimal(84.6666), 84.7);
    }

    #[test]
    fn aggregate_ignores_unentered_quarters() {
        let s = aggregate_quarters([80.0, 90.0, 0.0, 0.0]);
        assert_eq!(s.final_average, 85.0);
        assert_eq!(s.remarks, Remark::Passed);

        let s = aggregate_quarters([80.0, 85.0, 89.0, 0.0]);
        assert_eq!(s.final_average, 84.7);
    }

    #[test]
    fn aggregate_rounds_decimal_quarters_half_up() {
        // The f64 mean is 61.04999..., which still rounds up on the scaled value.
        assert_eq!(aggregate_quarters([60.0, 62.1, 0.0, 0.0]).final_average, 61.1);
        assert_eq!(aggregate_quarters([80.5, 81.6, 0.0, 0.0]).final_average, 81.1);
        assert_eq!(aggregate_quarters([90.25, 0.0, 0.0, 0.0]).final_average, 90.3);
    }

    #[test]
    fn aggregate_all_zero_is_failed() {
        let s = aggregate_quarters([0.0; 4]);
        assert_eq!(s.final_average, 0.0);
        assert_eq!(s.remarks, Remark::Failed);
    }

    #[test]
    fn passing_threshold_is_inclusive() {
        assert_eq!(aggregate_quarters([75.0, 0.0, 0.0, 0.0]).remarks, Remark::Passed);
        assert_eq!(aggregate_quarters([74.9, 0.0, 0.0, 0.0]).remarks, Remark::Failed);
        // 74.95 rounds up to 75.0 before classification.
        assert_eq!(aggregate_quarters([74.9, 75.0, 0.0, 0.0]).remarks, Remark::Passed);
    }

    #[test]
    fn general_average_skips_empty_subjects() {
        assert_eq!(general_average([80.0, 90.0, 0.0]), Some(85.0));
        assert_eq!(general_average([0.0, 0.0]), None);
    }

    #[test]
    fn attendance_summary_groups_by_month() {
        let rows = vec![
            (d("2025-06-02"), AttendanceStatus::Present),
            (d("2025-06-03"), AttendanceStatus::Late),
            (d("2025-06-04"), AttendanceStatus::Absent),
            (d("2025-07-01"), AttendanceStatus::Excused),
        ];
        let months = summarize_attendance(rows);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, "2025-06");
        assert_eq!(months[0].school_days, 3);
        assert_eq!(months[0].days_present, 2);
        assert_eq!(months[0].days_absent, 1);
        assert_eq!(months[1].days_absent, 1);
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(AttendanceStatus::parse("PRESENT"), Some(AttendanceStatus::Present));
        assert_eq!(AttendanceStatus::parse(" late "), Some(AttendanceStatus::Late));
        assert_eq!(AttendanceStatus::parse("unmarked"), None);
    }
}
