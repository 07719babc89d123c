//! Fleet topology loading
//!
//! A TOML document describes operators, their pools, stations and supply
//! points. Applying it goes through the regular creation protocol, so
//! addition voters may reject parts of it and listeners see every entity
//! appear.
//!
//! ```toml
//! [[operators]]
//! id = "DE*GEF"
//!
//! [[operators.pools]]
//! id = "DE*GEF*P1"
//!
//! [[operators.pools.stations]]
//! id = "DE*GEF*S1"
//!
//! [[operators.pools.stations.supply_points]]
//! id = "DE*GEF*E1*1"
//! admin_status = "out_of_service"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::fleet::{EntityCore, Network};
use crate::domain::ids::{EntityId, OperatorId, PoolId, StationId, SupplyPointId};
use crate::domain::status::{AdminStatusKind, StatusKind};
use crate::shared::{DomainError, DomainResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub operators: Vec<OperatorSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub id: OperatorId,
    #[serde(default)]
    pub admin_status: Option<AdminStatusKind>,
    #[serde(default)]
    pub custom_data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub id: PoolId,
    #[serde(default)]
    pub admin_status: Option<AdminStatusKind>,
    #[serde(default)]
    pub custom_data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub stations: Vec<StationSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSpec {
    pub id: StationId,
    #[serde(default)]
    pub admin_status: Option<AdminStatusKind>,
    #[serde(default)]
    pub custom_data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub supply_points: Vec<SupplyPointSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyPointSpec {
    pub id: SupplyPointId,
    #[serde(default)]
    pub status: Option<StatusKind>,
    #[serde(default)]
    pub admin_status: Option<AdminStatusKind>,
    #[serde(default)]
    pub custom_data: BTreeMap<String, serde_json::Value>,
}

/// What [`Topology::apply`] created. Vetoed entities are skipped together
/// with everything below them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologySummary {
    pub operators: usize,
    pub pools: usize,
    pub stations: usize,
    pub supply_points: usize,
    pub vetoed: usize,
}

impl Topology {
    pub fn load(path: &Path) -> DomainResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> DomainResult<Self> {
        let topology: Topology = toml::from_str(content)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Identifiers must be unique and every child must carry its operator's
    /// prefix.
    pub fn validate(&self) -> DomainResult<()> {
        let mut seen = std::collections::HashSet::new();
        let mut unique = |id: String| {
            if seen.insert(id.clone()) {
                Ok(())
            } else {
                Err(DomainError::Config(format!("duplicate id '{id}' in topology")))
            }
        };

        for operator in &self.operators {
            unique(operator.id.to_string())?;
            for pool in &operator.pools {
                unique(pool.id.to_string())?;
                same_operator(&operator.id, &pool.id.operator_id(), pool.id.as_str())?;
                for station in &pool.stations {
                    unique(station.id.to_string())?;
                    same_operator(&operator.id, &station.id.operator_id(), station.id.as_str())?;
                    for sp in &station.supply_points {
                        unique(sp.id.to_string())?;
                        same_operator(&operator.id, &sp.id.operator_id(), sp.id.as_str())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Create the described entities in `network`.
    pub fn apply(&self, network: &Network, timestamp: DateTime<Utc>) -> DomainResult<TopologySummary> {
        let mut summary = TopologySummary::default();

        for op_spec in &self.operators {
            let Some(operator) = network.create_operator(op_spec.id.clone(), timestamp)?.applied()
            else {
                warn!(operator_id = %op_spec.id, "Operator creation vetoed, skipping subtree");
                summary.vetoed += 1;
                continue;
            };
            summary.operators += 1;
            configure::<OperatorId>(&operator, op_spec.admin_status, &op_spec.custom_data, timestamp);

            for pool_spec in &op_spec.pools {
                let Some(pool) = operator.create_pool(pool_spec.id.clone(), timestamp)?.applied()
                else {
                    warn!(pool_id = %pool_spec.id, "Pool creation vetoed, skipping subtree");
                    summary.vetoed += 1;
                    continue;
                };
                summary.pools += 1;
                configure::<PoolId>(&pool, pool_spec.admin_status, &pool_spec.custom_data, timestamp);

                for st_spec in &pool_spec.stations {
                    let Some(station) =
                        pool.create_station(st_spec.id.clone(), timestamp)?.applied()
                    else {
                        warn!(station_id = %st_spec.id, "Station creation vetoed, skipping subtree");
                        summary.vetoed += 1;
                        continue;
                    };
                    summary.stations += 1;
                    configure::<StationId>(&station, st_spec.admin_status, &st_spec.custom_data, timestamp);

                    for sp_spec in &st_spec.supply_points {
                        let Some(sp) = station
                            .create_supply_point(sp_spec.id.clone(), timestamp)?
                            .applied()
                        else {
                            warn!(supply_point_id = %sp_spec.id, "Supply point creation vetoed");
                            summary.vetoed += 1;
                            continue;
                        };
                        summary.supply_points += 1;
                        if let Some(status) = sp_spec.status {
                            sp.set_status(timestamp, status);
                        }
                        configure::<SupplyPointId>(&sp, sp_spec.admin_status, &sp_spec.custom_data, timestamp);
                    }
                }
            }
        }

        info!(
            network_id = %network.id(),
            operators = summary.operators,
            pools = summary.pools,
            stations = summary.stations,
            supply_points = summary.supply_points,
            vetoed = summary.vetoed,
            "Topology applied"
        );
        Ok(summary)
    }
}

fn same_operator(expected: &OperatorId, actual: &OperatorId, id: &str) -> DomainResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DomainError::Config(format!(
            "'{id}' does not belong to operator '{expected}'"
        )))
    }
}

fn configure<Id: EntityId>(
    entity: &EntityCore<Id>,
    admin_status: Option<AdminStatusKind>,
    custom_data: &BTreeMap<String, serde_json::Value>,
    timestamp: DateTime<Utc>,
) {
    for (key, value) in custom_data {
        entity.set_custom_data(key, value.clone());
    }
    if let Some(admin) = admin_status {
        entity.set_admin_status(timestamp, admin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use crate::application::fleet::FleetSettings;
    use crate::application::router::RequestRouter;
    use crate::domain::status::AggregationStrategy;

    const SAMPLE: &str = r#"
[[operators]]
id = "DE*GEF"

[[operators.pools]]
id = "DE*GEF*P1"
custom_data = { city = "Berlin" }

[[operators.pools.stations]]
id = "DE*GEF*S1"

[[operators.pools.stations.supply_points]]
id = "DE*GEF*E1*1"
status = "charging"

[[operators.pools.stations.supply_points]]
id = "DE*GEF*E1*2"
admin_status = "out_of_service"
"#;

    fn network() -> Arc<Network> {
        let settings = FleetSettings {
            status_aggregation: AggregationStrategy::WorstOf,
            ..FleetSettings::default()
        };
        Network::new("net".parse().unwrap(), settings, Arc::new(RequestRouter::new()))
    }

    #[test]
    fn applies_hierarchy_with_initial_status() {
        let topology = Topology::parse(SAMPLE).unwrap();
        let network = network();

        let summary = topology.apply(&network, Utc::now()).unwrap();
        assert_eq!(summary.operators, 1);
        assert_eq!(summary.supply_points, 2);
        assert_eq!(summary.vetoed, 0);

        let sp2 = network
            .find_supply_point(&"DE*GEF*E1*2".parse().unwrap())
            .unwrap();
        assert_eq!(sp2.status().value, StatusKind::OutOfService);

        let pool = network.find_pool(&"DE*GEF*P1".parse().unwrap()).unwrap();
        assert_eq!(pool.custom_data().get_str("city"), Some("Berlin"));
        assert_eq!(network.status().value, StatusKind::OutOfService);
    }

    #[test]
    fn rejects_children_of_a_foreign_operator() {
        let err = Topology::parse(
            r#"
[[operators]]
id = "DE*GEF"

[[operators.pools]]
id = "FR*XYZ*P1"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = Topology::parse(
            r#"
[[operators]]
id = "DE*GEF"

[[operators.pools]]
id = "DE*GEF*P1"

[[operators.pools]]
id = "DE*GEF*P1"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn vetoed_pool_skips_its_subtree() {
        let topology = Topology::parse(SAMPLE).unwrap();
        let network = network();
        network
            .pool_channels()
            .addition
            .add_voter(|_, _, pool: &crate::application::fleet::Pool| {
                pool.id().as_str() != "DE*GEF*P1"
            });

        let summary = topology.apply(&network, Utc::now()).unwrap();
        assert_eq!(summary.operators, 1);
        assert_eq!(summary.pools, 0);
        assert_eq!(summary.supply_points, 0);
        assert_eq!(summary.vetoed, 1);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let topology = Topology::load(file.path()).unwrap();
        assert_eq!(topology.operators[0].pools[0].stations[0].supply_points.len(), 2);

        let missing = Topology::load(Path::new("/nonexistent/topology.toml"));
        assert!(matches!(missing, Err(DomainError::Io(_))));
    }
}
