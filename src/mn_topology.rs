//! Topology construction: which node connects to which at startup.
//!
//! Nodes are numbered in launch order. Every peer address handed to node `i`
//! belongs to a node with a smaller index, so a node only ever dials peers that
//! were started before it.

use std::path::PathBuf;

use hashbrown::HashSet;
use log::debug;
use serde::Deserialize;

use crate::mn_error::{HarnessError, Result};
use crate::mn_interface::{Address, LogSink, NodeIndex, NodeSpec};

pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Connection graph shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyKind {
    /// Node i connects to node i-1 only
    Chain,

    /// Chain, plus the last node also receives every earlier node's address
    FanInToLast,

    /// Node i connects to its `degree` nearest predecessors
    Regular { degree: usize },
}

/// Which address of earlier nodes the last node receives in a fan-in topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanInAddresses {
    #[default]
    P2p,
    Api,
}

/// First port of each range; node i gets `base + i`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BasePorts {
    pub p2p: u16,
    pub api: u16,
}

impl Default for BasePorts {
    fn default() -> Self {
        Self {
            p2p: 6000,
            api: 7000,
        }
    }
}

/// Builds the ordered list of node specs for a run
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    kind: TopologyKind,
    ports: BasePorts,
    host: String,
    fan_in_addresses: FanInAddresses,
    log_dir: Option<PathBuf>,
}

impl TopologyBuilder {
    pub fn new(kind: TopologyKind, ports: BasePorts) -> Self {
        Self {
            kind,
            ports,
            host: DEFAULT_HOST.to_string(),
            fan_in_addresses: FanInAddresses::default(),
            log_dir: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn fan_in_addresses(mut self, addresses: FanInAddresses) -> Self {
        self.fan_in_addresses = addresses;
        self
    }

    /// Node i writes its diagnostic stream to `<dir>/node-<i>.log`
    pub fn log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    pub fn build(&self, node_count: usize) -> Result<Vec<NodeSpec>> {
        if node_count < 1 {
            return Err(HarnessError::InvalidTopology(
                "node count must be at least 1".to_string(),
            ));
        }
        if let TopologyKind::Regular { degree: 0 } = self.kind {
            return Err(HarnessError::InvalidTopology(
                "regular topology needs a degree of at least 1".to_string(),
            ));
        }

        let p2p_ports = port_range(self.ports.p2p, node_count, "p2p")?;
        let api_ports = port_range(self.ports.api, node_count, "api")?;

        let mut seen = HashSet::new();
        for port in p2p_ports.iter().chain(api_ports.iter()) {
            if !seen.insert(*port) {
                return Err(HarnessError::InvalidTopology(format!(
                    "port {} is assigned twice",
                    port
                )));
            }
        }

        let p2p: Vec<Address> = p2p_ports.iter().map(|p| self.address(*p)).collect();
        let api: Vec<Address> = api_ports.iter().map(|p| self.address(*p)).collect();

        let specs: Vec<NodeSpec> = (0..node_count)
            .map(|i| NodeSpec {
                index: i,
                p2p_address: p2p[i].clone(),
                api_address: api[i].clone(),
                peer_addresses: self.peers_of(i, node_count, &p2p, &api),
                log_sink: self.log_sink(i),
            })
            .collect();

        validate(&specs)?;

        debug!(
            "built {:?} topology: {} nodes, p2p from {}, api from {}",
            self.kind, node_count, self.ports.p2p, self.ports.api
        );

        Ok(specs)
    }

    fn address(&self, port: u16) -> Address {
        format!("{}:{}", self.host, port)
    }

    fn log_sink(&self, index: NodeIndex) -> LogSink {
        match &self.log_dir {
            Some(dir) => LogSink::File(dir.join(format!("node-{}.log", index))),
            None => LogSink::Discard,
        }
    }

    fn peers_of(
        &self,
        index: NodeIndex,
        node_count: usize,
        p2p: &[Address],
        api: &[Address],
    ) -> Vec<Address> {
        match self.kind {
            TopologyKind::Chain => predecessors(index, 1, p2p),
            TopologyKind::Regular { degree } => predecessors(index, degree, p2p),
            TopologyKind::FanInToLast => {
                let mut peers = predecessors(index, 1, p2p);
                if index + 1 == node_count {
                    let extra = match self.fan_in_addresses {
                        FanInAddresses::P2p => &p2p[..index],
                        FanInAddresses::Api => &api[..index],
                    };
                    for address in extra {
                        if !peers.contains(address) {
                            peers.push(address.clone());
                        }
                    }
                }
                peers
            }
        }
    }
}

/// Shortcut for a loopback topology without log files
pub fn build(node_count: usize, kind: TopologyKind, ports: BasePorts) -> Result<Vec<NodeSpec>> {
    TopologyBuilder::new(kind, ports).build(node_count)
}

/// Checks address uniqueness and that every peer address was launched earlier
pub fn validate(specs: &[NodeSpec]) -> Result<()> {
    let mut bound: HashSet<&str> = HashSet::new();

    for (position, spec) in specs.iter().enumerate() {
        if spec.index != position {
            return Err(HarnessError::InvalidTopology(format!(
                "node at position {} has index {}",
                position, spec.index
            )));
        }

        for peer in &spec.peer_addresses {
            if !bound.contains(peer.as_str()) {
                return Err(HarnessError::InvalidTopology(format!(
                    "node {} connects to {} which is not launched before it",
                    spec.index, peer
                )));
            }
        }

        for address in [&spec.p2p_address, &spec.api_address] {
            if !bound.insert(address.as_str()) {
                return Err(HarnessError::InvalidTopology(format!(
                    "address {} is assigned twice",
                    address
                )));
            }
        }
    }

    Ok(())
}

fn predecessors(index: NodeIndex, degree: usize, p2p: &[Address]) -> Vec<Address> {
    (1..=degree.min(index))
        .map(|d| p2p[index - d].clone())
        .collect()
}

fn port_range(base: u16, count: usize, name: &str) -> Result<Vec<u16>> {
    (0..count)
        .map(|i| {
            u16::try_from(base as usize + i).map_err(|_| {
                HarnessError::InvalidTopology(format!(
                    "{} port {} + {} is out of range",
                    name, base, i
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> BasePorts {
        BasePorts {
            p2p: 6000,
            api: 7000,
        }
    }

    #[test]
    fn test_zero_nodes_rejected() {
        let result = build(0, TopologyKind::Chain, ports());
        assert!(matches!(result, Err(HarnessError::InvalidTopology(_))));
    }

    #[test]
    fn test_chain_peers() {
        let specs = build(8, TopologyKind::Chain, ports()).unwrap();
        assert_eq!(specs.len(), 8);

        assert!(specs[0].peer_addresses.is_empty());
        for i in 1..8 {
            assert_eq!(specs[i].peer_addresses, vec![specs[i - 1].p2p_address.clone()]);
        }

        assert_eq!(specs[5].p2p_address, "127.0.0.1:6005");
        assert_eq!(specs[5].api_address, "127.0.0.1:7005");
    }

    #[test]
    fn test_single_node() {
        let specs = build(1, TopologyKind::FanInToLast, ports()).unwrap();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].peer_addresses.is_empty());
    }

    #[test]
    fn test_addresses_unique() {
        for kind in [
            TopologyKind::Chain,
            TopologyKind::FanInToLast,
            TopologyKind::Regular { degree: 3 },
        ] {
            let specs = build(16, kind, ports()).unwrap();
            let mut seen = HashSet::new();
            for spec in &specs {
                assert!(seen.insert(spec.p2p_address.clone()));
                assert!(seen.insert(spec.api_address.clone()));
            }
        }
    }

    #[test]
    fn test_fan_in_p2p() {
        let specs = build(5, TopologyKind::FanInToLast, ports()).unwrap();

        for i in 1..4 {
            assert_eq!(specs[i].peer_addresses, vec![specs[i - 1].p2p_address.clone()]);
        }

        let last = &specs[4];
        assert_eq!(last.peer_addresses[0], specs[3].p2p_address);
        assert_eq!(last.peer_addresses.len(), 4);
        for spec in &specs[..4] {
            assert!(last.peer_addresses.contains(&spec.p2p_address));
        }
    }

    #[test]
    fn test_fan_in_api() {
        let specs = TopologyBuilder::new(TopologyKind::FanInToLast, ports())
            .fan_in_addresses(FanInAddresses::Api)
            .build(4)
            .unwrap();

        let last = &specs[3];
        assert_eq!(last.peer_addresses[0], specs[2].p2p_address);
        for spec in &specs[..3] {
            assert!(last.peer_addresses.contains(&spec.api_address));
        }
        assert_eq!(last.peer_addresses.len(), 4);
    }

    #[test]
    fn test_regular_degree() {
        let specs = build(6, TopologyKind::Regular { degree: 3 }, ports()).unwrap();

        assert!(specs[0].peer_addresses.is_empty());
        assert_eq!(specs[2].peer_addresses.len(), 2);
        assert_eq!(
            specs[5].peer_addresses,
            vec![
                specs[4].p2p_address.clone(),
                specs[3].p2p_address.clone(),
                specs[2].p2p_address.clone(),
            ]
        );

        let chain = build(6, TopologyKind::Chain, ports()).unwrap();
        let regular_one = build(6, TopologyKind::Regular { degree: 1 }, ports()).unwrap();
        assert_eq!(chain, regular_one);
    }

    #[test]
    fn test_regular_zero_degree_rejected() {
        let result = build(3, TopologyKind::Regular { degree: 0 }, ports());
        assert!(matches!(result, Err(HarnessError::InvalidTopology(_))));
    }

    #[test]
    fn test_port_collision_rejected() {
        let overlapping = BasePorts {
            p2p: 6000,
            api: 6004,
        };
        let result = build(5, TopologyKind::Chain, overlapping);
        assert!(matches!(result, Err(HarnessError::InvalidTopology(_))));

        // ranges just touch
        assert!(build(4, TopologyKind::Chain, overlapping).is_ok());
    }

    #[test]
    fn test_port_overflow_rejected() {
        let high = BasePorts {
            p2p: 65534,
            api: 7000,
        };
        let result = build(3, TopologyKind::Chain, high);
        assert!(matches!(result, Err(HarnessError::InvalidTopology(_))));
    }

    #[test]
    fn test_log_sinks() {
        let specs = TopologyBuilder::new(TopologyKind::Chain, ports())
            .log_dir(Some(PathBuf::from("/tmp/run")))
            .build(2)
            .unwrap();
        assert_eq!(specs[1].log_sink, LogSink::File(PathBuf::from("/tmp/run/node-1.log")));

        let specs = build(2, TopologyKind::Chain, ports()).unwrap();
        assert_eq!(specs[0].log_sink, LogSink::Discard);
    }

    #[test]
    fn test_validate_rejects_forward_peer() {
        let mut specs = build(3, TopologyKind::Chain, ports()).unwrap();
        let forward = specs[2].p2p_address.clone();
        specs[0].peer_addresses.push(forward);
        assert!(matches!(validate(&specs), Err(HarnessError::InvalidTopology(_))));
    }

    #[test]
    fn test_custom_host() {
        let specs = TopologyBuilder::new(TopologyKind::Chain, ports())
            .host("10.0.0.1")
            .build(2)
            .unwrap();
        assert_eq!(specs[1].peer_addresses, vec!["10.0.0.1:6000".to_string()]);
    }
}
