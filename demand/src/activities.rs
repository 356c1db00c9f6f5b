//! Samples what an agent does all day (the activity chain) and for how long
//! (dwell times from per-chain Gaussian mixtures).

use anyhow::Result;
use rand::Rng;
use rand_xorshift::XorShiftRng;

use genutil::{sample_cumulative, sample_multivariate_gaussian, sample_weighted};
use zone_model::{ActivityType, Duration};

use crate::strata::{ActivityChainRecord, StrataKey, StrataTable};

/// Sample one day's activity sequence. The chain may only start where the
/// agent currently is: at home, or anywhere else ("other").
pub fn sample_activity_chain<'a>(
    table: &'a StrataTable,
    key: StrataKey,
    start: ActivityType,
    rng: &mut XorShiftRng,
) -> Result<&'a ActivityChainRecord> {
    if start != ActivityType::Home && start != ActivityType::Other {
        bail!("activity chains can't start at {}", start);
    }
    let set = table.chains(key, start)?;
    let idx = sample_cumulative(&set.cumulative, rng.gen_range(0.0..1.0));
    Ok(&set.records[idx])
}

/// Sample dwell times for a chain, one entry per activity. The final
/// activity always lasts until the end of the day (`None`); a length-1 chain
/// has no timed activities at all.
pub fn sample_dwell_times(
    table: &StrataTable,
    key: StrataKey,
    record: &ActivityChainRecord,
    rng: &mut XorShiftRng,
) -> Result<Vec<Option<Duration>>> {
    if record.chain.len() == 1 {
        return Ok(vec![None]);
    }

    // Prefer the mixture fitted in the record's own bucket; thin buckets
    // carry none and resolve through the stratified fallback.
    let table_mixture;
    let mixture = match &record.dwell_mixture {
        Some(m) => m,
        None => {
            table_mixture = table.mixture(key, &record.chain)?;
            table_mixture
        }
    };

    let component = sample_weighted(&mixture.weights, rng);
    let draws = sample_multivariate_gaussian(
        &mixture.means[component],
        &mixture.covariances[component],
        rng,
    )?;
    if draws.len() != record.chain.len() - 1 {
        bail!(
            "dwell-time mixture for chain {:?} has dimension {}, expected {}",
            record.chain,
            draws.len(),
            record.chain.len() - 1
        );
    }

    let mut result: Vec<Option<Duration>> = draws
        .into_iter()
        // The mixture doesn't constrain the sign; a stay can't be negative.
        .map(|mins| Some(Duration::f64_minutes(mins.max(0.0))))
        .collect();
    result.push(None);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrataGroupRecord;
    use crate::strata::GaussianMixture;
    use rand::SeedableRng;
    use zone_model::ActivityType::{Home, Other, Shopping, Work};

    fn table() -> StrataTable {
        StrataTable::new(
            vec![StrataGroupRecord {
                key: StrataKey::UNDEFINED,
                sample_size: 1000,
                chains: vec![
                    ActivityChainRecord {
                        chain: vec![Home],
                        weight: 1.0,
                        dwell_mixture: None,
                    },
                    ActivityChainRecord {
                        chain: vec![Home, Work, Home],
                        weight: 3.0,
                        dwell_mixture: Some(GaussianMixture {
                            weights: vec![1.0],
                            means: vec![vec![450.0, 510.0]],
                            covariances: vec![vec![vec![900.0, 0.0], vec![0.0, 3600.0]]],
                        }),
                    },
                    ActivityChainRecord {
                        chain: vec![Other, Home],
                        weight: 1.0,
                        dwell_mixture: Some(GaussianMixture {
                            weights: vec![1.0],
                            // A mean deep below zero: draws clamp to 0.
                            means: vec![vec![-500.0]],
                            covariances: vec![vec![vec![1.0]]],
                        }),
                    },
                ],
            }],
            30,
        )
        .unwrap()
    }

    #[test]
    fn chain_start_must_be_home_or_other() {
        let table = table();
        let mut rng = XorShiftRng::seed_from_u64(1);
        assert!(sample_activity_chain(&table, StrataKey::UNDEFINED, Work, &mut rng).is_err());
        assert!(sample_activity_chain(&table, StrataKey::UNDEFINED, Shopping, &mut rng).is_err());
        assert!(sample_activity_chain(&table, StrataKey::UNDEFINED, Home, &mut rng).is_ok());
    }

    #[test]
    fn single_activity_chain_dwells_until_end_of_day() {
        let table = table();
        let mut rng = XorShiftRng::seed_from_u64(1);
        let record = ActivityChainRecord {
            chain: vec![Home],
            weight: 1.0,
            dwell_mixture: None,
        };
        assert_eq!(
            sample_dwell_times(&table, StrataKey::UNDEFINED, &record, &mut rng).unwrap(),
            vec![None]
        );
    }

    #[test]
    fn dwell_times_match_chain_length_and_clamp() {
        let table = table();
        let mut rng = XorShiftRng::seed_from_u64(42);
        let set = table.chains(StrataKey::UNDEFINED, Home).unwrap();
        let record = set
            .records
            .iter()
            .find(|r| r.chain.len() == 3)
            .unwrap();
        for _ in 0..100 {
            let dwells =
                sample_dwell_times(&table, StrataKey::UNDEFINED, record, &mut rng).unwrap();
            assert_eq!(dwells.len(), 3);
            assert_eq!(dwells[2], None);
            for d in &dwells[..2] {
                assert!(d.unwrap() >= Duration::ZERO);
            }
        }

        // The negative-mean chain clamps every draw to zero.
        let record = table
            .chains(StrataKey::UNDEFINED, Other)
            .unwrap()
            .records[0]
            .clone();
        let dwells = sample_dwell_times(&table, StrataKey::UNDEFINED, &record, &mut rng).unwrap();
        assert_eq!(dwells, vec![Some(Duration::ZERO), None]);
    }
}
