//! Bucketing of raw history samples.
//!
//! Samples arrive oldest first. Only the most recent
//! [`Granularity::sample_count`] samples are used; they are grouped into
//! windows cut from the newest end, so a short window is always the oldest.
//! A short window averages over the samples it actually has.

use time::Date;

use dispenser_types::{Bucket, BucketSeries, Granularity, SummaryStats};

/// Round to one decimal place.
///
/// Values too large to scale are already integral and come back unchanged.
pub fn round1(value: f64) -> f64 {
    let scaled = value * 10.0;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / 10.0
}

/// Group samples into the buckets of a granularity.
pub fn aggregate(samples: &[f64], granularity: Granularity) -> BucketSeries {
    let start = samples.len().saturating_sub(granularity.sample_count());
    let recent = &samples[start..];

    let mut buckets = match granularity {
        Granularity::Daily => hourly(recent),
        Granularity::Weekly => windowed(recent, granularity.window(), "Day"),
        Granularity::Monthly => windowed(recent, granularity.window(), "Week"),
    };
    buckets.reverse();

    BucketSeries {
        granularity,
        buckets,
    }
}

/// One bucket per sample, newest first. Only every other hour is labelled.
fn hourly(samples: &[f64]) -> Vec<Bucket> {
    samples
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &value)| {
            let label = if i % 2 == 0 {
                String::new()
            } else {
                format!("{}h", 23 - i)
            };
            Bucket::new(label, round1(value))
        })
        .collect()
}

/// Mean of each window, newest first, labelled counting down.
fn windowed(samples: &[f64], window: usize, unit: &str) -> Vec<Bucket> {
    let count = samples.len().div_ceil(window);
    samples
        .rchunks(window)
        .enumerate()
        .map(|(i, chunk)| {
            let mean = chunk.iter().sum::<f64>() / chunk.len() as f64;
            Bucket::new(format!("{unit} {}", count - i), round1(mean))
        })
        .collect()
}

/// Summary statistics of a bucket series.
///
/// `average` is derived from the rounded total so that it always equals
/// `round1(total / count)`.
pub fn summarize(series: &BucketSeries, generated_at: Date) -> SummaryStats {
    let count = series.len();
    if count == 0 {
        return SummaryStats {
            generated_at: Some(generated_at),
            ..SummaryStats::default()
        };
    }

    let total = round1(series.values().sum());
    let peak = series.values().fold(f64::NEG_INFINITY, f64::max);

    SummaryStats {
        total,
        average: round1(total / count as f64),
        peak: round1(peak),
        generated_at: Some(generated_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::date;

    fn ascending(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(1.25), 1.3);
        assert_eq!(round1(1.24), 1.2);
        assert_eq!(round1(-0.04), -0.0);
        assert_eq!(round1(10.0), 10.0);
    }

    #[test]
    fn test_round1_huge_values_stay_finite() {
        assert_eq!(round1(1e308), 1e308);
        assert_eq!(round1(-1e308), -1e308);
        assert_eq!(round1(f64::MAX), f64::MAX);

        let series = aggregate(&[1e308], Granularity::Daily);
        assert_eq!(series.buckets[0].value, 1e308);
        assert!(series.buckets[0].value.is_finite());
    }

    #[test]
    fn test_daily_full_day() {
        let series = aggregate(&ascending(24), Granularity::Daily);

        assert_eq!(series.len(), 24);
        assert_eq!(series.values().collect::<Vec<_>>(), ascending(24));

        let labels: Vec<&str> = series.labels().collect();
        assert_eq!(labels[0], "0h");
        assert_eq!(labels[1], "");
        assert_eq!(labels[2], "2h");
        assert_eq!(labels[22], "22h");
        assert_eq!(labels[23], "");
    }

    #[test]
    fn test_daily_uses_most_recent_samples() {
        let series = aggregate(&ascending(30), Granularity::Daily);
        assert_eq!(series.len(), 24);
        assert_eq!(series.buckets.first().unwrap().value, 6.0);
        assert_eq!(series.buckets.last().unwrap().value, 29.0);
    }

    #[test]
    fn test_daily_partial_day() {
        let series = aggregate(&[5.0, 6.0, 7.0], Granularity::Daily);
        let labels: Vec<&str> = series.labels().collect();
        assert_eq!(labels, vec!["21h", "22h", ""]);
        assert_eq!(series.values().collect::<Vec<_>>(), vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_weekly_two_days() {
        let mut samples = vec![1.0; 24];
        samples.extend(vec![3.0; 24]);
        let series = aggregate(&samples, Granularity::Weekly);

        assert_eq!(series.labels().collect::<Vec<_>>(), vec!["Day 1", "Day 2"]);
        assert_eq!(series.values().collect::<Vec<_>>(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_weekly_short_window_divides_by_present() {
        // 30 samples: oldest window has 6 samples of 2.0, newest 24 of 4.0
        let mut samples = vec![2.0; 6];
        samples.extend(vec![4.0; 24]);
        let series = aggregate(&samples, Granularity::Weekly);

        assert_eq!(series.len(), 2);
        assert_eq!(series.values().collect::<Vec<_>>(), vec![2.0, 4.0]);
        assert_eq!(series.labels().collect::<Vec<_>>(), vec!["Day 1", "Day 2"]);
    }

    #[test]
    fn test_weekly_full_week() {
        let series = aggregate(&ascending(200), Granularity::Weekly);
        assert_eq!(series.len(), 7);
        assert_eq!(series.buckets[0].label, "Day 1");
        assert_eq!(series.buckets[6].label, "Day 7");
        // Newest window is samples 176..=199
        assert_eq!(series.buckets[6].value, 187.5);
    }

    #[test]
    fn test_monthly_buckets() {
        let series = aggregate(&vec![1.0; 720], Granularity::Monthly);
        assert_eq!(series.len(), 5);
        assert_eq!(
            series.labels().collect::<Vec<_>>(),
            vec!["Week 1", "Week 2", "Week 3", "Week 4", "Week 5"]
        );
        assert!(series.values().all(|v| v == 1.0));
    }

    #[test]
    fn test_bucket_values_rounded() {
        let series = aggregate(&[1.0, 1.0, 2.0], Granularity::Weekly);
        assert_eq!(series.values().collect::<Vec<_>>(), vec![1.3]);
    }

    #[test]
    fn test_empty_samples() {
        for granularity in Granularity::ALL {
            let series = aggregate(&[], granularity);
            assert!(series.is_empty());
            assert_eq!(series.granularity, granularity);

            let stats = summarize(&series, date!(2024 - 05 - 01));
            assert_eq!(stats.total, 0.0);
            assert_eq!(stats.average, 0.0);
            assert_eq!(stats.peak, 0.0);
        }
    }

    #[test]
    fn test_summarize() {
        let series = aggregate(&[1.0, 2.0, 4.0], Granularity::Daily);
        let stats = summarize(&series, date!(2024 - 05 - 01));

        assert_eq!(stats.total, 7.0);
        assert_eq!(stats.average, 2.3);
        assert_eq!(stats.peak, 4.0);
        assert_eq!(stats.generated_at, Some(date!(2024 - 05 - 01)));
    }

    #[test]
    fn test_summarize_negative_peak() {
        let series = aggregate(&[-3.0, -1.5], Granularity::Daily);
        let stats = summarize(&series, date!(2024 - 05 - 01));
        assert_eq!(stats.peak, -1.5);
    }

    proptest! {
        #[test]
        fn bucket_count_is_bounded(
            samples in proptest::collection::vec(-1000.0f64..1000.0, 0..900),
            index in 0usize..3,
        ) {
            let granularity = Granularity::ALL[index];
            let series = aggregate(&samples, granularity);
            prop_assert!(series.len() <= granularity.bucket_capacity());
            prop_assert!(series.len() <= samples.len());
        }

        #[test]
        fn stats_are_consistent(samples in proptest::collection::vec(0.0f64..500.0, 1..200)) {
            let series = aggregate(&samples, Granularity::Weekly);
            let stats = summarize(&series, date!(2024 - 05 - 01));
            let max = series.values().fold(f64::NEG_INFINITY, f64::max);

            prop_assert_eq!(stats.average, round1(stats.total / series.len() as f64));
            prop_assert_eq!(stats.peak, max);
        }
    }
}
