//! Empirical behavioral distributions are stratified by day type and
//! demographics. Sparse strata degrade to broader ones in a fixed order, so
//! a thin sample never drives a simulation decision.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use genutil::build_cumulative;
use zone_model::ActivityType;

use crate::config::StrataGroupRecord;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DayType {
    Mo,
    Tu,
    We,
    Th,
    Fr,
    Sa,
    So,
    Holiday,
    Undefined,
}

/// Socioeconomic ("homogeneous") group.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HomGroup {
    Working,
    NonWorking,
    PupilStudent,
    Undefined,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MobilityGroup {
    CarUser,
    CarOther,
    Other,
    Undefined,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeGroup {
    A0To40,
    A40To60,
    A60To100,
    Undefined,
}

impl AgeGroup {
    pub fn from_age(age: usize) -> AgeGroup {
        if age < 40 {
            AgeGroup::A0To40
        } else if age < 60 {
            AgeGroup::A40To60
        } else {
            AgeGroup::A60To100
        }
    }
}

/// The composite key indexing stratified tables. Never mutated after
/// construction; relaxation produces fresh keys.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrataKey {
    pub day_type: DayType,
    pub hom_group: HomGroup,
    pub mobility_group: MobilityGroup,
    pub age: AgeGroup,
}

impl StrataKey {
    pub const UNDEFINED: StrataKey = StrataKey {
        day_type: DayType::Undefined,
        hom_group: HomGroup::Undefined,
        mobility_group: MobilityGroup::Undefined,
        age: AgeGroup::Undefined,
    };

    /// This key, then progressively broader keys: age, then mobility group,
    /// then socioeconomic group, then day type wildcarded in turn. The last
    /// entry is always the fully-undefined key.
    pub fn relaxations(self) -> Vec<StrataKey> {
        let mut keys = vec![self];
        let mut key = self;
        key.age = AgeGroup::Undefined;
        keys.push(key);
        key.mobility_group = MobilityGroup::Undefined;
        keys.push(key);
        key.hom_group = HomGroup::Undefined;
        keys.push(key);
        key.day_type = DayType::Undefined;
        keys.push(key);
        keys.dedup();
        keys
    }
}

impl fmt::Display for StrataKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({:?}, {:?}, {:?}, {:?})",
            self.day_type, self.hom_group, self.mobility_group, self.age
        )
    }
}

/// A Gaussian mixture over the dwell times of one activity chain. One
/// weight/mean-vector/covariance-matrix triple per component; the dimension
/// is one less than the chain length (the final activity is open-ended).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GaussianMixture {
    pub weights: Vec<f64>,
    pub means: Vec<Vec<f64>>,
    pub covariances: Vec<Vec<Vec<f64>>>,
}

/// One observed daily activity sequence with its sampling weight.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityChainRecord {
    /// Non-empty; starts at Home or Other.
    pub chain: Vec<ActivityType>,
    pub weight: f64,
    /// Missing for single-activity chains, and for chains whose bucket was
    /// too thin to fit a mixture (resolved by relaxation).
    pub dwell_mixture: Option<GaussianMixture>,
}

/// The chains of one bucket that share a first activity, with their
/// cumulative weight distribution built once.
#[derive(Clone, Debug)]
pub struct ChainSet {
    pub records: Vec<ActivityChainRecord>,
    pub cumulative: Vec<f64>,
}

#[derive(Clone, Debug)]
struct ActivityGroup {
    sample_size: usize,
    by_start: BTreeMap<ActivityType, ChainSet>,
}

/// Maps strata keys to activity-chain data, with hierarchical fallback.
#[derive(Clone, Debug)]
pub struct StrataTable {
    groups: BTreeMap<StrataKey, ActivityGroup>,
    min_sample_size: usize,
}

impl StrataTable {
    pub fn new(records: Vec<StrataGroupRecord>, min_sample_size: usize) -> Result<StrataTable> {
        let mut groups = BTreeMap::new();
        for record in records {
            let key = record.key;
            let mut by_start: BTreeMap<ActivityType, Vec<ActivityChainRecord>> = BTreeMap::new();
            for chain in record.chains {
                if chain.chain.is_empty() {
                    bail!("empty activity chain in bucket {}", key);
                }
                let start = chain.chain[0];
                if start != ActivityType::Home && start != ActivityType::Other {
                    bail!(
                        "activity chain {:?} in bucket {} doesn't start at home or other",
                        chain.chain,
                        key
                    );
                }
                by_start.entry(start).or_default().push(chain);
            }
            let by_start = by_start
                .into_iter()
                .map(|(start, records)| {
                    let cumulative =
                        build_cumulative(&records.iter().map(|r| r.weight).collect::<Vec<_>>());
                    (
                        start,
                        ChainSet {
                            records,
                            cumulative,
                        },
                    )
                })
                .collect();
            if groups
                .insert(
                    key,
                    ActivityGroup {
                        sample_size: record.sample_size,
                        by_start,
                    },
                )
                .is_some()
            {
                bail!("duplicate strata bucket {}", key);
            }
        }

        let table = StrataTable {
            groups,
            min_sample_size,
        };
        // The fully-wildcarded bucket backs every relaxation chain; a table
        // without it is malformed.
        for start in [ActivityType::Home, ActivityType::Other] {
            table.chains(StrataKey::UNDEFINED, start)?;
        }
        Ok(table)
    }

    fn usable(&self, key: StrataKey) -> Option<&ActivityGroup> {
        self.groups
            .get(&key)
            .filter(|g| g.sample_size >= self.min_sample_size)
    }

    /// The chain distribution for this key and start activity, degrading the
    /// key until a sufficiently sampled bucket covers the start.
    pub fn chains(&self, key: StrataKey, start: ActivityType) -> Result<&ChainSet> {
        for relaxed in key.relaxations() {
            if let Some(set) = self.usable(relaxed).and_then(|g| g.by_start.get(&start)) {
                return Ok(set);
            }
        }
        bail!(
            "no activity chains starting at {} for strata {} at any relaxation level; \
             the stratified table is malformed",
            start,
            key
        )
    }

    /// The dwell-time mixture registered for one specific chain, degrading
    /// the key until some bucket carries a mixture for it.
    pub fn mixture(&self, key: StrataKey, chain: &[ActivityType]) -> Result<&GaussianMixture> {
        let start = chain[0];
        for relaxed in key.relaxations() {
            if let Some(mixture) = self
                .usable(relaxed)
                .and_then(|g| g.by_start.get(&start))
                .and_then(|set| {
                    set.records
                        .iter()
                        .find(|r| r.chain == chain)
                        .and_then(|r| r.dwell_mixture.as_ref())
                })
            {
                return Ok(mixture);
            }
        }
        bail!(
            "no dwell-time mixture for chain {:?} under strata {} at any relaxation level",
            chain,
            key
        )
    }
}
