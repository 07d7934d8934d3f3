//! Rejection sampling of pickup/destination pairs.
use crate::geo::{Geodesic, SphericalEarth};
use fareprobe_common::persistence::AddressCorpus;
use fareprobe_common::{meters_to_miles, ProbeError, Result, Route};
use fareprobe_config::SamplerConfig;
use std::sync::Arc;
use tracing::{debug, info};

/// Accepted distance window and redraw ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub min_miles: f64,
    pub max_miles: f64,
    pub max_draws: u64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self::from(&SamplerConfig::default())
    }
}

impl From<&SamplerConfig> for SamplerSettings {
    fn from(config: &SamplerConfig) -> Self {
        Self {
            min_miles: config.min_miles,
            max_miles: config.max_miles,
            max_draws: config.max_draws,
        }
    }
}

impl SamplerSettings {
    /// Both bounds are inclusive.
    pub fn accepts(&self, miles: f64) -> bool {
        !(miles < self.min_miles || miles > self.max_miles)
    }
}

/// Draws random address pairs until one lies inside the distance window.
#[derive(Clone)]
pub struct GeoSampler {
    corpus: Arc<dyn AddressCorpus>,
    geodesic: Arc<dyn Geodesic>,
    settings: SamplerSettings,
}

impl GeoSampler {
    pub fn new(corpus: Arc<dyn AddressCorpus>, settings: SamplerSettings) -> Self {
        Self {
            corpus,
            geodesic: Arc::new(SphericalEarth),
            settings,
        }
    }

    pub fn with_geodesic(mut self, geodesic: Arc<dyn Geodesic>) -> Self {
        self.geodesic = geodesic;
        self
    }

    /// Draw pairs until one is accepted.
    ///
    /// Pairs naming the same address twice are redrawn. Fails with
    /// [`ProbeError::CorpusExhausted`] once `max_draws` pairs were rejected or
    /// the corpus cannot supply two records.
    pub async fn sample(&self) -> Result<Route> {
        let SamplerSettings {
            min_miles,
            max_miles,
            max_draws,
        } = self.settings;
        let mut draws = 0u64;

        while draws < max_draws {
            let mut pair = self.corpus.sample(2).await.map_err(|err| match err {
                ProbeError::CorpusExhausted { detail, .. } => {
                    ProbeError::CorpusExhausted { draws, detail }
                }
                other => other,
            })?;
            draws += 1;

            let (Some(destination), Some(pickup)) = (pair.pop(), pair.pop()) else {
                return Err(ProbeError::CorpusExhausted {
                    draws,
                    detail: "corpus returned fewer than two records".to_string(),
                });
            };
            if pickup.id == destination.id {
                debug!(id = %pickup.id, draws, "sampler.same_address");
                continue;
            }

            let distance_meters = self
                .geodesic
                .distance_meters(pickup.coordinates(), destination.coordinates());
            let miles = meters_to_miles(distance_meters);
            if !self.settings.accepts(miles) {
                debug!(miles, draws, "sampler.route_rejected");
                continue;
            }

            info!(
                pickup = %pickup.display_text(),
                destination = %destination.display_text(),
                miles,
                draws,
                "sampler.route_accepted"
            );
            return Ok(Route {
                pickup,
                destination,
                distance_meters,
                draws,
            });
        }

        Err(ProbeError::CorpusExhausted {
            draws,
            detail: format!("no pair between {min_miles} and {max_miles} miles"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fareprobe_common::AddressRecord;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn record(id: &str, latitude: f64, longitude: f64) -> AddressRecord {
        AddressRecord {
            id: id.to_string(),
            latitude,
            longitude,
            house_number: "1".to_string(),
            street: format!("{id} St"),
            postcode: "90012".to_string(),
        }
    }

    /// Hands out pre-scripted pairs, then reports exhaustion.
    struct ScriptedCorpus(Mutex<VecDeque<Vec<AddressRecord>>>);

    impl ScriptedCorpus {
        fn new(pairs: Vec<Vec<AddressRecord>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(pairs.into())))
        }
    }

    #[async_trait]
    impl AddressCorpus for ScriptedCorpus {
        async fn sample(&self, _size: usize) -> Result<Vec<AddressRecord>> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProbeError::CorpusExhausted {
                    draws: 0,
                    detail: "script ran out".to_string(),
                })
        }
    }

    /// Distance is taken from the pickup latitude, in miles.
    struct FixedMiles;

    impl Geodesic for FixedMiles {
        fn distance_meters(&self, from: fareprobe_common::Coordinates, _to: fareprobe_common::Coordinates) -> f64 {
            from.latitude * fareprobe_common::METERS_PER_MILE
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        let settings = SamplerSettings::default();
        assert!(settings.accepts(5.0));
        assert!(settings.accepts(30.0));
        assert!(!settings.accepts(4.999));
        assert!(!settings.accepts(30.001));
    }

    #[tokio::test]
    async fn redraws_until_distance_fits() {
        let corpus = ScriptedCorpus::new(vec![
            vec![record("short", 2.0, 0.0), record("x", 0.0, 0.0)],
            vec![record("long", 45.0, 0.0), record("y", 0.0, 0.0)],
            vec![record("fits", 12.0, 0.0), record("z", 0.0, 0.0)],
        ]);
        let sampler = GeoSampler::new(corpus, SamplerSettings::default())
            .with_geodesic(Arc::new(FixedMiles));

        let route = sampler.sample().await.unwrap();
        assert_eq!(route.pickup.id, "fits");
        assert_eq!(route.destination.id, "z");
        assert_eq!(route.draws, 3);
    }

    #[tokio::test]
    async fn same_address_is_never_a_route() {
        let corpus = ScriptedCorpus::new(vec![
            vec![record("a", 10.0, 0.0), record("a", 10.0, 0.0)],
            vec![record("a", 10.0, 0.0), record("b", 0.0, 0.0)],
        ]);
        let sampler = GeoSampler::new(corpus, SamplerSettings::default())
            .with_geodesic(Arc::new(FixedMiles));

        let route = sampler.sample().await.unwrap();
        assert_ne!(route.pickup.id, route.destination.id);
        assert_eq!(route.draws, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_draws() {
        let pairs = (0..10)
            .map(|n| vec![record(&format!("p{n}"), 1.0, 0.0), record("q", 0.0, 0.0)])
            .collect();
        let settings = SamplerSettings {
            max_draws: 4,
            ..SamplerSettings::default()
        };
        let sampler = GeoSampler::new(ScriptedCorpus::new(pairs), settings)
            .with_geodesic(Arc::new(FixedMiles));

        match sampler.sample().await {
            Err(ProbeError::CorpusExhausted { draws, .. }) => assert_eq!(draws, 4),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_corpus_reports_draws_so_far() {
        let corpus = ScriptedCorpus::new(vec![vec![record("near", 1.0, 0.0), record("q", 0.0, 0.0)]]);
        let sampler = GeoSampler::new(corpus, SamplerSettings::default())
            .with_geodesic(Arc::new(FixedMiles));

        match sampler.sample().await {
            Err(ProbeError::CorpusExhausted { draws, detail }) => {
                assert_eq!(draws, 1);
                assert_eq!(detail, "script ran out");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_sample_is_exhaustion() {
        let corpus = ScriptedCorpus::new(vec![vec![record("lonely", 10.0, 0.0)]]);
        let sampler = GeoSampler::new(corpus, SamplerSettings::default());
        assert!(matches!(
            sampler.sample().await,
            Err(ProbeError::CorpusExhausted { .. })
        ));
    }
}
